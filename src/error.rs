//! Error types for the settlement core
//!
//! Every fallible operation in this crate returns [`Result`]. The variants map
//! one-to-one onto the failure classes callers need to tell apart: input
//! problems are never retried, dependency outages are retried with backoff, and
//! disputed or partially settled payments go to an operator.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, X402Error>;

/// Errors produced by the facilitator and its collaborators
#[derive(Debug, Error)]
pub enum X402Error {
    /// Bad caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown payment request, webhook record, network, ...
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Payment request is past its TTL
    #[error("Payment request expired: {0}")]
    Expired(String),

    /// Signature failed structural or cryptographic checks
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// On-chain data disagrees with the claimed payment
    #[error("Transaction mismatch: {0}")]
    TransactionMismatch(String),

    /// Claimed transaction exists but has not been mined yet
    #[error("Transaction pending: {0}")]
    TransactionPending(String),

    /// Circuit open or upstream timeout
    #[error("Dependency unavailable: {dependency}: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    /// Admission control rejected the call
    #[error("Rate limited: {key}:{operation}, retry after {reset_at}")]
    RateLimited {
        key: String,
        operation: String,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    /// Payer balance does not cover the transfer
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// First leg of a native fee split succeeded, second did not
    #[error("Partial settlement (payee tx {payee_tx}): {message}")]
    PartialSettlement { payee_tx: String, message: String },

    /// Settlement would violate a fee policy (e.g. negative net amount)
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream chain node returned an error
    #[error("Chain error: {0}")]
    Chain(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Redis error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl X402Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create an expired error
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired(message.into())
    }

    /// Create an invalid-signature error
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature(message.into())
    }

    /// Create a transaction-mismatch error
    pub fn transaction_mismatch(message: impl Into<String>) -> Self {
        Self::TransactionMismatch(message.into())
    }

    /// Create a transaction-pending error
    pub fn transaction_pending(message: impl Into<String>) -> Self {
        Self::TransactionPending(message.into())
    }

    /// Create a dependency-unavailable error
    pub fn dependency_unavailable(
        dependency: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Create an insufficient-funds error
    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::InsufficientFunds(message.into())
    }

    /// Create a partial-settlement error
    pub fn partial_settlement(payee_tx: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PartialSettlement {
            payee_tx: payee_tx.into(),
            message: message.into(),
        }
    }

    /// Create a policy-violation error
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a chain error
    pub fn chain(message: impl Into<String>) -> Self {
        Self::Chain(message.into())
    }

    /// Whether the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. }
                | Self::RateLimited { .. }
                | Self::TransactionPending(_)
                | Self::Http(_)
        )
    }

    /// Stable snake_case code for API responses and webhook payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Expired(_) => "expired",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::TransactionMismatch(_) => "transaction_mismatch",
            Self::TransactionPending(_) => "transaction_pending",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::PartialSettlement { .. } => "partial_settlement",
            Self::PolicyViolation(_) => "policy_violation",
            Self::Config(_) => "configuration_error",
            Self::Chain(_) => "chain_error",
            Self::Http(_) => "http_error",
            Self::Json(_) => "json_error",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "storage_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(X402Error::dependency_unavailable("polygon", "circuit open").is_retryable());
        assert!(X402Error::transaction_pending("0xabc").is_retryable());
        assert!(!X402Error::transaction_mismatch("amount").is_retryable());
        assert!(!X402Error::partial_settlement("0xabc", "fee leg failed").is_retryable());
        assert!(!X402Error::validation("amount must be positive").is_retryable());
    }

    #[test]
    fn test_rate_limit_and_circuit_are_distinguishable() {
        let limited = X402Error::RateLimited {
            key: "agent-1".to_string(),
            operation: "payment_create".to_string(),
            reset_at: chrono::Utc::now(),
        };
        let open = X402Error::dependency_unavailable("ethereum", "circuit open");

        assert_eq!(limited.code(), "rate_limited");
        assert_eq!(open.code(), "dependency_unavailable");
    }
}
