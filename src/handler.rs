use std::sync::Arc;

use axum::{
    Form,
    extract::{Path, State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use tracing::info;

use crate::csrf::CsrfToken;
use crate::db::Database;
use crate::error::HandlerError;
use crate::flash::{Category, Flash, Flashes};
use crate::form::{BookForm, FieldErrors, ValidBook};
use crate::model::Book;
use crate::view::Views;

pub const BOOK_EXISTS: &str = "Book already exists in the library";
pub const BOOK_NOT_FOUND: &str = "Book not found";
pub const BOOK_REMOVED: &str = "Book Removed From Your Library!";
pub const GENERIC_FAILURE: &str = "An Error Occurred!";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub views: Arc<Views>,
}

impl AppState {
    pub fn new(db: Database, views: Views) -> Self {
        AppState {
            db: Arc::new(db),
            views: Arc::new(views),
        }
    }
}

#[derive(Serialize)]
struct IndexPage<'a> {
    books: &'a [Book],
    num_books: usize,
    messages: &'a [Flash],
}

#[derive(Serialize)]
struct FormPage<'a> {
    form: &'a BookForm,
    errors: &'a FieldErrors,
    messages: &'a [Flash],
    csrf_token: &'a str,
    book: Option<&'a Book>,
}

fn render<S: Serialize>(state: &AppState, template: &str, page: S) -> Result<Response, HandlerError> {
    let html = state.views.render(template, page)?;
    Ok(Html(html).into_response())
}

fn render_form(
    state: &AppState,
    template: &str,
    form: &BookForm,
    errors: &FieldErrors,
    flashes: Flashes,
    csrf: CsrfToken,
    book: Option<&Book>,
) -> Result<Response, HandlerError> {
    let response = render(
        state,
        template,
        FormPage {
            form,
            errors,
            messages: flashes.messages(),
            csrf_token: csrf.value(),
            book,
        },
    )?;
    Ok(csrf.attach(flashes.consume(response)))
}

fn book_not_found(book_id: i64) -> Response {
    info!(book_id, "book not found");
    (StatusCode::NOT_FOUND, BOOK_NOT_FOUND).into_response()
}

/// A body axum could not decode (wrong content type, repeated field) is
/// treated as an empty submission so it goes through normal validation.
fn submitted_form(form: Result<Form<BookForm>, FormRejection>) -> BookForm {
    match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            info!(error = %rejection, "undecodable form body");
            BookForm::default()
        }
    }
}

/// Runs the field validators and the CSRF check together so every error
/// is reported in one round trip.
fn check_submission(form: &BookForm, csrf: &CsrfToken) -> Result<ValidBook, FieldErrors> {
    let csrf_error = csrf.verify(form.csrf_token.as_deref()).err();
    match (form.validate(), csrf_error) {
        (Ok(valid), None) => Ok(valid),
        (result, csrf_error) => {
            let mut errors = result.err().unwrap_or_default();
            errors.csrf_token.extend(csrf_error.map(String::from));
            Err(errors)
        }
    }
}

pub async fn home(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, HandlerError> {
    let flashes = Flashes::from_headers(&headers);
    let books = state.db.list_books_by_date_added().await?;

    let response = render(
        &state,
        "index.html",
        IndexPage {
            books: &books,
            num_books: books.len(),
            messages: flashes.messages(),
        },
    )?;
    Ok(flashes.consume(response))
}

pub async fn show_add_form(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, HandlerError> {
    let flashes = Flashes::from_headers(&headers);
    let csrf = CsrfToken::from_headers(&headers);
    render_form(&state, "add.html", &BookForm::default(), &FieldErrors::default(), flashes, csrf, None)
}

pub async fn add_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<BookForm>, FormRejection>,
) -> Result<Response, HandlerError> {
    let form = submitted_form(form);
    let mut flashes = Flashes::from_headers(&headers);
    let csrf = CsrfToken::from_headers(&headers);

    let valid = match check_submission(&form, &csrf) {
        Ok(valid) => valid,
        Err(errors) => {
            info!(?errors, "rejected add form");
            return render_form(&state, "add.html", &form, &errors, flashes, csrf, None);
        }
    };

    if let Some(existing) = state.db.find_book_by_title_author(&valid.title, &valid.author).await? {
        info!(book_id = existing.id, title = %valid.title, author = %valid.author, "duplicate book rejected");
        flashes.push(Category::Message, BOOK_EXISTS);
        return render_form(&state, "add.html", &form, &FieldErrors::default(), flashes, csrf, None);
    }

    let book = state.db.create_book(&valid.title, &valid.author, valid.review).await?;
    info!(book_id = book.id, title = %book.title, author = %book.author, "book added");

    Ok(flashes.redirect("/"))
}

pub async fn show_edit_form(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let Some(book) = state.db.get_book_by_id(book_id).await? else {
        return Ok(book_not_found(book_id));
    };

    let flashes = Flashes::from_headers(&headers);
    let csrf = CsrfToken::from_headers(&headers);
    let form = BookForm::from_book(&book);
    render_form(&state, "edit.html", &form, &FieldErrors::default(), flashes, csrf, Some(&book))
}

/// No duplicate check here, unlike `add_book`: an edit may produce a
/// (title, author) pair that already exists.
pub async fn edit_book(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
    headers: HeaderMap,
    form: Result<Form<BookForm>, FormRejection>,
) -> Result<Response, HandlerError> {
    let Some(mut book) = state.db.get_book_by_id(book_id).await? else {
        return Ok(book_not_found(book_id));
    };

    let form = submitted_form(form);
    let flashes = Flashes::from_headers(&headers);
    let csrf = CsrfToken::from_headers(&headers);

    let valid = match check_submission(&form, &csrf) {
        Ok(valid) => valid,
        Err(errors) => {
            info!(book_id, ?errors, "rejected edit form");
            return render_form(&state, "edit.html", &form, &errors, flashes, csrf, Some(&book));
        }
    };

    state
        .db
        .update_book(&mut book, &valid.title, &valid.author, valid.review)
        .await?;
    info!(book_id, title = %book.title, author = %book.author, review = book.review, "book updated");

    Ok(flashes.redirect("/"))
}

pub async fn delete_book(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let mut flashes = Flashes::from_headers(&headers);

    let Some(book) = state.db.get_book_by_id(book_id).await? else {
        info!(book_id, "delete of unknown book");
        flashes.push(Category::Error, BOOK_NOT_FOUND);
        return Ok(flashes.redirect("/"));
    };

    match state.db.delete_book(&book).await {
        Ok(()) => {
            info!(book_id, title = %book.title, "book removed");
            flashes.push(Category::Success, BOOK_REMOVED);
        }
        Err(e) => {
            tracing::error!(book_id, error = %format!("{e:#}"), "failed to delete book");
            flashes.push(Category::Error, GENERIC_FAILURE);
        }
    }

    Ok(flashes.redirect("/"))
}
