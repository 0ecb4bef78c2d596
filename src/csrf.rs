//! Double-submit CSRF protection for the book forms.
//!
//! Every rendered form carries the browser's token twice: once in the
//! `bookshelf_csrf` cookie and once in the hidden `csrf_token` field. A POST
//! is accepted only when both are present and equal.

use axum::{
    http::{HeaderMap, HeaderValue, header::SET_COOKIE},
    response::Response,
};
use uuid::Uuid;

use crate::cookie_value;

pub const CSRF_COOKIE: &str = "bookshelf_csrf";

pub const TOKEN_MISSING: &str = "The CSRF token is missing.";
pub const SESSION_TOKEN_MISSING: &str = "The CSRF session token is missing.";
pub const TOKEN_MISMATCH: &str = "The CSRF tokens do not match.";

#[derive(Debug)]
pub struct CsrfToken {
    value: String,
    fresh: bool,
}

impl CsrfToken {
    /// The token from the request cookie, or a newly minted one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match cookie_value(headers, CSRF_COOKIE).filter(|v| is_well_formed(v)) {
            Some(value) => CsrfToken {
                value: value.to_string(),
                fresh: false,
            },
            None => CsrfToken {
                value: Uuid::new_v4().simple().to_string(),
                fresh: true,
            },
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Checks the token submitted with a form against the cookie.
    pub fn verify(&self, submitted: Option<&str>) -> Result<(), &'static str> {
        let submitted = match submitted.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Err(TOKEN_MISSING),
        };
        if self.fresh {
            return Err(SESSION_TOKEN_MISSING);
        }
        if !constant_time_eq(submitted.as_bytes(), self.value.as_bytes()) {
            return Err(TOKEN_MISMATCH);
        }
        Ok(())
    }

    /// Sets the cookie on `response` when the token was minted for this request.
    pub fn attach(self, mut response: Response) -> Response {
        if !self.fresh {
            return response;
        }

        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", CSRF_COOKIE, self.value);
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "failed to set csrf cookie"),
        }
        response
    }
}

fn is_well_formed(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
