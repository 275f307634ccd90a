//! The HTTP boundary's error type: a status code wrapping an `anyhow::Error`.
//! Store-level errors map onto statuses by their taxonomy — missing content
//! is 404, permission problems are 403, invalid request input is 400, and
//! everything else is 500 — and render as plain-text bodies.

use axum::http::StatusCode;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(error: anyhow::Error) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }
}

impl From<catalog::Error> for ApiError {
    fn from(err: catalog::Error) -> Self {
        Self::new(status_for(&err), err.into())
    }
}

fn status_for(err: &catalog::Error) -> StatusCode {
    match err {
        catalog::Error::NotFound(_) => StatusCode::NOT_FOUND,
        catalog::Error::InvalidName(_) => StatusCode::BAD_REQUEST,
        catalog::Error::Content(err) if err.is_not_found() => StatusCode::NOT_FOUND,
        catalog::Error::Content(err) => io_status(err.io_kind()),
        catalog::Error::Io(err) => io_status(Some(err.kind())),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn io_status(kind: Option<std::io::ErrorKind>) -> StatusCode {
    match kind {
        Some(std::io::ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(std::io::ErrorKind::PermissionDenied) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %format!("{:#}", self.error), "request failed");
        }
        // Alternate formatting renders the nested causes.
        (self.status, format!("{:#}", self.error)).into_response()
    }
}
