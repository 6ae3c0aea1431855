//! Error taxonomy shared by the core services and the persistence gateway

use crate::validation::ValidationError;
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Amount {requested:.2} exceeds remaining balance of {remaining:.2}")]
    BalanceExceeded {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl CoreError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        CoreError::PermissionDenied(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict(message.into())
    }

    /// Business outcomes the caller can act on, as opposed to faults
    pub fn is_business_failure(&self) -> bool {
        !matches!(self, CoreError::Database(_) | CoreError::Persistence(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
