use crate::domain::transaction::TransactionStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Gateway timed out: {0}")]
    GatewayTimeout(String),
    #[error("Swap failed: {0}")]
    SwapFailed(String),
    #[error("Gateway error: {0}")]
    Gateway(String),
    /// Lost an optimistic-lock race; the caller reloads and retries.
    #[error("Stale version for transaction {0}")]
    StaleVersion(uuid::Uuid),
    #[error("Storage error: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SettlementError {
    /// Stable taxonomy code surfaced to operators and API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::Csv(_) => "VALIDATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Conflict(_) | Self::StaleVersion(_) => "CONFLICT",
            Self::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
            Self::SwapFailed(_) => "SWAP_FAILED",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Storage(_) | Self::Config(_) | Self::Io(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::Csv(_) | Self::InvalidSignature => 400,
            Self::Authorization(_) => 403,
            Self::NotFound(_) => 404,
            Self::InvalidTransition { .. }
            | Self::Conflict(_)
            | Self::StaleVersion(_)
            | Self::SwapFailed(_) => 409,
            Self::GatewayTimeout(_) | Self::Gateway(_) => 502,
            Self::Storage(_) | Self::Config(_) | Self::Io(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTimeout(_) | Self::Gateway(_) | Self::StaleVersion(_)
        )
    }

    pub(crate) fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(SettlementError::Validation("x".into()).status_code(), 400);
        assert_eq!(SettlementError::Authorization("x".into()).status_code(), 403);
        assert_eq!(SettlementError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            SettlementError::InvalidTransition {
                from: TransactionStatus::Cancelled,
                to: TransactionStatus::Paid,
            }
            .status_code(),
            409
        );
        assert_eq!(SettlementError::InvalidSignature.status_code(), 400);
        assert_eq!(SettlementError::Conflict("x".into()).status_code(), 409);
        assert_eq!(SettlementError::GatewayTimeout("x".into()).status_code(), 502);
        assert_eq!(SettlementError::SwapFailed("x".into()).status_code(), 409);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SettlementError::GatewayTimeout("slow".into()).is_retryable());
        assert!(!SettlementError::InvalidSignature.is_retryable());
        assert_eq!(
            SettlementError::StaleVersion(uuid::Uuid::nil()).code(),
            "CONFLICT"
        );
    }
}
