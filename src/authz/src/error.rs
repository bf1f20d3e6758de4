//! Error types for the interception pipeline
//!
//! Gate denials are not errors: they travel back to the caller as
//! [`Outcome::Denied`](crate::chain::Outcome). Business errors raised by a
//! wrapped operation are not errors of this crate either: they are handed
//! back untouched in [`Outcome::OperationFailed`](crate::chain::Outcome).

use thiserror::Error;

/// Warden errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No declaration registered for an operation
    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    /// Invalid policy declaration
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing async runtime or worker failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Audit storage collaborator failed
    #[error("Audit store error: {0}")]
    AuditStore(String),

    /// Operation timed out
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for warden operations
pub type Result<T> = std::result::Result<T, AuthzError>;
