use std::io;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

/// Everything that can end a speed test request early.
///
/// Implements [`IntoResponse`]: each variant maps to one status code and its
/// `Display` text becomes the plain-text body.
#[derive(Debug, Error)]
pub enum SpeedtestError {
    #[error("invalid or missing \"bytes\" query parameter")]
    InvalidSize,

    #[error("request body is empty")]
    EmptyBody,

    #[error("method not allowed")]
    MethodNotAllowed,

    /// The `Range` header could not be served from this body.
    #[error("{reason}")]
    RangeNotSatisfiable { size: u64, reason: String },

    /// The body length does not fit the signed length used for framing.
    #[error("negative content size computed")]
    ContentSizeOverflow,

    #[error("failed to read request body: {0}")]
    ReadBody(#[source] axum::Error),

    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SpeedtestError>;

impl SpeedtestError {
    pub fn status(&self) -> StatusCode {
        match self {
            SpeedtestError::InvalidSize | SpeedtestError::EmptyBody => StatusCode::BAD_REQUEST,
            SpeedtestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SpeedtestError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            SpeedtestError::ContentSizeOverflow
            | SpeedtestError::ReadBody(_)
            | SpeedtestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SpeedtestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "speedtest request failed");
        } else {
            tracing::debug!(%status, error = %self, "speedtest request rejected");
        }

        let body = format!("{self}\n");
        match self {
            SpeedtestError::RangeNotSatisfiable { size, .. } => {
                let content_range = TypedHeader(ContentRange::unsatisfied_bytes(size));
                (status, content_range, body).into_response()
            }
            SpeedtestError::MethodNotAllowed => {
                (status, [(header::ALLOW, "GET, POST")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}
