use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

/// A failed DAV request: the status sent to the client, and what caused it
/// for the logs. The cause never ends up in the response body.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {reason}")]
pub struct Error {
    pub status: StatusCode,
    reason: String,
}

impl Error {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// An error without any more detail than its status.
    pub fn status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, reason)
    }

    /// Keeps the cause but answers with `status` instead.
    pub fn with_status(self, status: StatusCode) -> Self {
        Self { status, ..self }
    }
}

impl From<duckcloud_fs::Error> for Error {
    fn from(value: duckcloud_fs::Error) -> Self {
        use duckcloud_fs::Error::*;

        let status = match &value {
            NotFound(_) => StatusCode::NOT_FOUND,
            AlreadyExists(_) | IsADirectory(_) => StatusCode::METHOD_NOT_ALLOWED,
            NotADirectory(_) | InvalidParent(_) => StatusCode::CONFLICT,
            Invalid(_) => StatusCode::BAD_REQUEST,
            Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self::new(status, value.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        Self::bad_request(format!("malformed xml: {}", value))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::bad_request(format!("invalid utf-8: {}", value))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(err=%self.reason, status=%self.status, "request failed");
        } else {
            debug!(err=%self.reason, status=%self.status, "request rejected");
        }

        (self.status, status_text(self.status)).into_response()
    }
}

/// The reason phrase sent as body of error responses.
pub fn status_text(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or_default()
}

/// The status line used inside multistatus bodies.
pub fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {} {}", status.as_u16(), status_text(status))
}
