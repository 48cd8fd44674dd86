use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::desktop::DesktopError;

/// Terminal outcome of a rejected control or dispatch request. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Desktop(#[from] DesktopError),
}

impl ControlError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        ControlError::Forbidden(reason.into())
    }

    pub fn unprocessable(reason: impl Into<String>) -> Self {
        ControlError::Unprocessable(reason.into())
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        ControlError::NotFound(reason.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        ControlError::BadRequest(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ControlError::Forbidden(_) => StatusCode::FORBIDDEN,
            ControlError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::Desktop(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            ControlError::Unauthorized(_) => "unauthorized",
            ControlError::Forbidden(_) => "forbidden",
            ControlError::Unprocessable(_) => "unprocessable",
            ControlError::NotFound(_) => "not_found",
            ControlError::BadRequest(_) => "bad_request",
            ControlError::Desktop(_) => "desktop",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
