//! Validation and normalization of the add/edit book form.

use serde::{Deserialize, Serialize};

use crate::model::Book;

pub const REVIEW_MIN: f64 = 0.0;
pub const REVIEW_MAX: f64 = 10.0;

const REQUIRED: &str = "This field is required.";
const NOT_A_FLOAT: &str = "Not a valid float value.";

/// Raw values as submitted by the browser. Kept verbatim so a rejected form
/// can be shown back to the user exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookForm {
    pub book_name: Option<String>,
    pub book_author: Option<String>,
    pub review: Option<String>,
    pub csrf_token: Option<String>,
}

/// A submission that passed validation, with title and author normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBook {
    pub title: String,
    pub author: String,
    pub review: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldErrors {
    pub book_name: Vec<String>,
    pub book_author: Vec<String>,
    pub review: Vec<String>,
    /// Form-level errors, checked by the handler rather than `validate`.
    pub csrf_token: Vec<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.book_name.is_empty()
            && self.book_author.is_empty()
            && self.review.is_empty()
            && self.csrf_token.is_empty()
    }
}

impl BookForm {
    pub fn from_book(book: &Book) -> Self {
        BookForm {
            book_name: Some(book.title.clone()),
            book_author: Some(book.author.clone()),
            review: Some(format_review(book.review)),
            csrf_token: None,
        }
    }

    pub fn validate(&self) -> Result<ValidBook, FieldErrors> {
        let mut errors = FieldErrors::default();

        let title = required_text(self.book_name.as_deref(), &mut errors.book_name);
        let author = required_text(self.book_author.as_deref(), &mut errors.book_author);
        let review = parse_review(self.review.as_deref(), &mut errors.review);

        match (title, author, review) {
            (Some(title), Some(author), Some(review)) if errors.is_empty() => Ok(ValidBook {
                title: title_case(title),
                author: title_case(author),
                review,
            }),
            _ => Err(errors),
        }
    }
}

/// Whole numbers keep one decimal place, so a stored 9 shows as "9.0".
fn format_review(review: f64) -> String {
    format!("{:?}", review)
}

fn required_text<'a>(value: Option<&'a str>, errors: &mut Vec<String>) -> Option<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.push(REQUIRED.to_string());
            None
        }
    }
}

fn parse_review(value: Option<&str>, errors: &mut Vec<String>) -> Option<f64> {
    let raw = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => {
            errors.push(REQUIRED.to_string());
            return None;
        }
    };

    let review = match raw.parse::<f64>() {
        Ok(r) if r.is_finite() => r,
        _ => {
            errors.push(NOT_A_FLOAT.to_string());
            return None;
        }
    };

    if !(REVIEW_MIN..=REVIEW_MAX).contains(&review) {
        errors.push(format!("Number must be between {} and {}.", REVIEW_MIN, REVIEW_MAX));
        return None;
    }

    Some(review)
}

/// Upper-cases the first letter of every run of letters and lower-cases the
/// rest, so "o'brien" becomes "O'Brien" and "THE HOBBIT" becomes "The Hobbit".
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_is_letter = false;

    for c in input.chars() {
        if prev_is_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_is_letter = c.is_alphabetic();
    }

    out
}
