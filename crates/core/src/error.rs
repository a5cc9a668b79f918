//! Unified error taxonomy for the Lodestar control plane.
//!
//! Every crate in the workspace reports failures through this enum so the
//! transport layer can translate them into stable wire codes without
//! inspecting message strings.

use thiserror::Error;

/// Result type alias using Lodestar's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Lodestar modules
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User disabled: {0}")]
    UserDisabled(String),

    #[error("User locked: {0}")]
    UserLocked(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Link disabled: {0}")]
    LinkDisabled(String),

    #[error("Link expired: {0}")]
    LinkExpired(String),

    #[error("Link exhausted: {0}")]
    LinkExhausted(String),

    #[error("Password required")]
    PasswordRequired,

    #[error("Password wrong")]
    PasswordWrong,

    #[error("Unresolved reference: {0}")]
    ReferenceUnresolved(String),

    #[error("Lease error: {0}")]
    LeaseError(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure is a retryable infrastructure fault rather
    /// than a caller mistake.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::TransactionConflict(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::StoreUnavailable("dial".into()).is_transient());
        assert!(Error::TransactionConflict("cas".into()).is_transient());
        assert!(!Error::NotFound("user".into()).is_transient());
        assert!(!Error::PermissionDenied("deny".into()).is_transient());
    }

    #[test]
    fn test_serde_json_conversion() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
