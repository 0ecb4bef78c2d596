use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// Failures a handler cannot recover from. The user only ever sees a generic
/// page; the full chain goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    StorageError(#[from] anyhow::Error),
    #[error("RenderError: {0}")]
    RenderError(#[from] minijinja::Error),
}

const ERROR_PAGE: &str = r#"<!doctype html>
<html>
    <head><title>Bookshelf</title><link rel="stylesheet" href="/static/style.css"></head>
    <body>
        <main class="container">
            <h1>An Error Occurred!</h1>
            <p><a href="/">Back to your library</a></p>
        </main>
    </body>
</html>
"#;

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match &self {
            HandlerError::StorageError(e) => tracing::error!(error = %format!("{e:#}"), "storage failure"),
            HandlerError::RenderError(e) => tracing::error!(error = %crate::unpack_error(e), "render failure"),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
    }
}
