use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::blockchain::crypto::CryptoError;
use crate::blockchain::transaction::TransactionError;
use crate::blockchain::{BlockchainError, ErrorKind};

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] BlockchainError),

    #[error("Operation refused in constrained mode: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Ledger(e) => e.kind(),
            ApiError::Forbidden(_) => ErrorKind::Forbidden,
            ApiError::BadRequest(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        ApiError::Ledger(err.into())
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::IncompleteData => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateTransaction | ErrorKind::OverlapError => StatusCode::CONFLICT,
            ErrorKind::InsufficientFunds | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::CorruptState | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}
