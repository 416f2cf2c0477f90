use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::upstream::UpstreamError;

/// Upstream bodies echoed back to clients are cut to this many characters.
const RAW_BODY_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} is not set.")]
    MissingCredential(&'static str),
    #[error("{code}")]
    BadRequest { code: &'static str, message: String },
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Not Found")]
    NotFound,
    #[error("Upstream API error")]
    Upstream { status: u16, raw: String },
    #[error("Internal server error")]
    Transport,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
}

impl AppError {
    pub fn bad_request<T: Into<String>>(code: &'static str, message: T) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Transport | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request("INVALID_QUERY", rejection.body_text())
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { status, body } => AppError::Upstream {
                status,
                raw: truncate(&body, RAW_BODY_LIMIT),
            },
            UpstreamError::Transport(_) => AppError::Transport,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::Internal(err) = &self {
            tracing::error!(error = %err, "request failed");
        }

        let mut body = ErrorBody {
            error: self.to_string(),
            message: None,
            status: None,
            raw: None,
        };

        match self {
            AppError::BadRequest { message, .. } => body.message = Some(message),
            AppError::Upstream { status, raw } => {
                body.status = Some(status);
                body.raw = Some(raw);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("국세청API", 3), "국세청");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn upstream_status_is_forwarded() {
        let err = AppError::from(UpstreamError::Status {
            status: 503,
            body: "maintenance".into(),
        });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_credential_names_the_variable() {
        let err = AppError::MissingCredential("SMES_KEY");
        assert_eq!(err.to_string(), "SMES_KEY is not set.");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
