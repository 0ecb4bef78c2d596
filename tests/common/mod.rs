//! Shared helpers for driving the router in-process.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, header},
    response::Response,
};
use bookshelf::{app, csrf::CSRF_COOKIE, db::Database, handler::AppState, view::Views};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_TOKEN: &str = "testtoken123";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _dir: TempDir,
}

/// A fresh app backed by its own temporary database.
pub async fn spawn() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_local(&dir.path().join("books.db")).await.unwrap();
    let state = AppState::new(db, Views::new().unwrap());
    let router = app(state.clone());
    TestApp {
        state,
        router,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> Response {
        self.get_with_cookie(uri, None).await
    }

    pub async fn get_with_cookie(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Posts `body` the way a browser that loaded the form would: with the
    /// CSRF cookie set and the matching hidden field appended.
    pub async fn post_form(&self, uri: &str, body: &str) -> Response {
        let cookie = format!("{CSRF_COOKIE}={TEST_TOKEN}");
        let body = format!("{body}&csrf_token={TEST_TOKEN}");
        self.post_raw(uri, &body, Some(&cookie), "application/x-www-form-urlencoded")
            .await
    }

    pub async fn post_raw(&self, uri: &str, body: &str, cookie: Option<&str>, content_type: &str) -> Response {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }

    pub async fn count(&self) -> usize {
        self.state.db.count_books().await.unwrap()
    }
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap())
}

/// The `name=value` part of the flash cookie set on `response`, ready to be
/// sent back in a `Cookie` header.
pub fn flash_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .find(|v| v.starts_with("bookshelf_flash="))
        .and_then(|v| v.split(';').next())
        .map(String::from)
}

/// The value of the `name` cookie set on `response`.
pub fn set_cookie_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
