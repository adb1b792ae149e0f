use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::ports::RepositoryError;

/// Transport-independent classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::InsufficientStock { .. }
            | AppError::InsufficientFunds { .. }
            | AppError::InvalidState(_)
            | AppError::TransactionConflict(_) => ErrorKind::Conflict,
            AppError::InvariantViolation(_) | AppError::Database(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only storage write conflicts are worth retrying; business-rule
    /// failures would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransactionConflict(_))
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Conflict(msg) => AppError::TransactionConflict(msg),
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<crate::validation::ValidationError> for AppError {
    fn from(err: crate::validation::ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_status_code() {
        let error = AppError::InvalidInput("quantity must be positive".to_string());
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_status_code() {
        let error = AppError::NotFound("order".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_forbidden_status_code() {
        let error = AppError::Forbidden("not your order".to_string());
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_business_rule_failures_are_conflicts() {
        let stock = AppError::InsufficientStock {
            product_id: Uuid::nil(),
            requested: 2,
            available: 1,
        };
        let funds = AppError::InsufficientFunds {
            required: 10,
            available: 5,
        };
        let state = AppError::InvalidState("not delivered".to_string());
        for error in [stock, funds, state] {
            assert_eq!(error.kind(), ErrorKind::Conflict);
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn test_write_conflict_is_retryable() {
        let error: AppError = RepositoryError::Conflict("40001".to_string()).into();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_invariant_violation_is_internal() {
        let error = AppError::InvariantViolation("negative balance".to_string());
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_database_error_response() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_insufficient_stock_response() {
        let error = AppError::InsufficientStock {
            product_id: Uuid::nil(),
            requested: 3,
            available: 0,
        };
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
