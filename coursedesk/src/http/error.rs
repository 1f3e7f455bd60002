use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::application;
use crate::domain::ErrorKind;
use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] application::Error),
    #[error("missing credentials")]
    Unauthorized,
    #[error("invalid credentials")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::App(application::Error::Gateway(
                GatewayError::MissingSignature | GatewayError::InvalidSignature,
            )) => StatusCode::UNAUTHORIZED,
            ApiError::App(err) => match err.kind() {
                Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
                Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
                Some(ErrorKind::Forbidden) => StatusCode::FORBIDDEN,
                Some(ErrorKind::Conflict) => StatusCode::CONFLICT,
                None => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(json!({ "error": message }))
    }
}
