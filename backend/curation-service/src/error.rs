use crate::db::StoreError;
use crate::services::bandit::BanditError;
use crate::services::decay::DecayError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Store unavailable: {0}")]
    Store(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Store(msg)
            | AppError::CorruptState(msg)
            | AppError::Internal(msg) => msg.clone(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CorruptState(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err.to_string())
    }
}

impl From<BanditError> for AppError {
    fn from(err: BanditError) -> Self {
        match err {
            BanditError::Store(e) => e.into(),
            BanditError::CorruptState(msg) => AppError::CorruptState(msg),
            BanditError::Math(e) => AppError::Internal(e.to_string()),
            BanditError::Task(msg) => AppError::Internal(msg),
        }
    }
}

impl From<DecayError> for AppError {
    fn from(err: DecayError) -> Self {
        match err {
            DecayError::NegativeTtl(_) => AppError::Validation(err.to_string()),
            DecayError::Bandit(e) => e.into(),
            DecayError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let store: AppError = BanditError::Store(StoreError::Redis("down".into())).into();
        assert_eq!(store.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let ttl: AppError = DecayError::NegativeTtl(-5).into();
        assert_eq!(ttl.status_code(), StatusCode::BAD_REQUEST);
    }
}
