//! One-shot notices that survive a single redirect.
//!
//! Messages are stored in the `bookshelf_flash` cookie as a comma separated
//! list of `category:message` entries, each half percent-encoded. The next
//! page that renders them clears the cookie.

use axum::{
    http::{HeaderMap, HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use crate::cookie_value;

pub const FLASH_COOKIE: &str = "bookshelf_flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Message,
    Success,
    Error,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Message => "message",
            Category::Success => "success",
            Category::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => Category::Success,
            "error" => Category::Error,
            _ => Category::Message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flash {
    pub category: Category,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Flashes {
    messages: Vec<Flash>,
    from_cookie: bool,
}

impl Flashes {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match cookie_value(headers, FLASH_COOKIE) {
            Some(value) => Flashes {
                messages: decode(value),
                from_cookie: true,
            },
            None => Flashes::default(),
        }
    }

    pub fn push(&mut self, category: Category, message: impl Into<String>) {
        self.messages.push(Flash {
            category,
            message: message.into(),
        });
    }

    pub fn messages(&self) -> &[Flash] {
        &self.messages
    }

    /// Marks the messages as shown: clears the cookie on `response` if the
    /// messages came from one.
    pub fn consume(self, mut response: Response) -> Response {
        if self.from_cookie {
            response
                .headers_mut()
                .append(SET_COOKIE, HeaderValue::from_static(CLEAR_COOKIE));
        }
        response
    }

    /// Redirects to `to`, carrying every pending message along.
    pub fn redirect(self, to: &str) -> Response {
        let mut response = Redirect::to(to).into_response();
        if self.messages.is_empty() {
            return response;
        }

        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", FLASH_COOKIE, encode(&self.messages));
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "dropping flash messages"),
        }
        response
    }
}

const CLEAR_COOKIE: &str = "bookshelf_flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax";

fn encode(messages: &[Flash]) -> String {
    messages
        .iter()
        .map(|f| format!("{}:{}", f.category.as_str(), urlencoding::encode(&f.message)))
        .collect::<Vec<_>>()
        .join(",")
}

fn decode(value: &str) -> Vec<Flash> {
    value
        .split(',')
        .filter_map(|entry| entry.split_once(':'))
        .filter_map(|(category, message)| {
            let message = urlencoding::decode(message).ok()?;
            Some(Flash {
                category: Category::parse(category),
                message: message.into_owned(),
            })
        })
        .collect()
}
