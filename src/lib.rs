use axum::{
    Router,
    http::{HeaderMap, header::COOKIE},
    routing::get,
};
use std::error::Error;
use tower_http::trace::TraceLayer;

use crate::handler::AppState;

pub mod assets;
pub mod config;
pub mod csrf;
pub mod db;
pub mod error;
pub mod flash;
pub mod form;
pub mod handler;
pub mod model;
pub mod view;

/// Builds the full application router around `state`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handler::home))
        .route("/add", get(handler::show_add_form).post(handler::add_book))
        .route("/edit/:id", get(handler::show_edit_form).post(handler::edit_book))
        .route("/delete/:id", get(handler::delete_book))
        .route("/static/*path", get(assets::serve_static))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

/// Value of the cookie `name` sent with the request, if any.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
