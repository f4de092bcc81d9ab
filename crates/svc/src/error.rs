// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced by the toggle core.
#[derive(Debug, thiserror::Error)]
pub enum SvcError {
    /// Malformed request, or an empty list where a non-empty one is required.
    #[error("bad request")]
    BadRequest,

    /// Unknown application, segment, or toggle row.
    #[error("not found")]
    NotFound,

    /// Liveness marker is gone; the session must start over.
    #[error("session expired")]
    SessionExpired,

    /// The session was persisted but the reconciler inbox is full.
    /// Its counters will only be reclaimed once the liveness TTL lapses.
    #[error("session tracker overflow")]
    TrackerOverflow,

    /// A session-store batch returned fewer replies than requested.
    #[error("store reply incomplete")]
    ReplyNotFull,

    /// Session record failed to encode or decode.
    #[error("session state codec: {0}")]
    Codec(String),

    /// Catalog store failure.
    #[error("catalog: {0}")]
    Catalog(#[from] sqlx::Error),

    /// Session store failure.
    #[error("session store: {0}")]
    Sessions(#[from] redis::RedisError),

    /// Backend-agnostic store failure.
    #[error("store: {0}")]
    Store(String),
}

impl SvcError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest | Self::NotFound | Self::SessionExpired => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Tag this error with the endpoint it surfaced from.
    pub fn at(self, endpoint: &'static str) -> ApiError {
        ApiError { endpoint, err: self }
    }
}

/// An [`SvcError`] bound to an endpoint name for response mapping.
///
/// Client errors answer with a bare `Bad Request`; everything else is
/// logged under the endpoint name and answered with `Internal Server Error`.
#[derive(Debug)]
pub struct ApiError {
    endpoint: &'static str,
    err: SvcError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.err.http_status();

        if status.is_server_error() {
            tracing::error!(endpoint = self.endpoint, err = %self.err, "request failed");
        }

        let body = match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            _ => "Internal Server Error",
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
