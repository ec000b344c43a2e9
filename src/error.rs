//! Error types for Salesdesk
//!
//! This module defines the error taxonomy shared by the store backends,
//! the gateways and the query client, using `thiserror` for ergonomic
//! error handling.

use thiserror::Error;

/// Main error type for Salesdesk operations
///
/// Every variant carries a rendered message so the error is `Clone`. The
/// query client hands the same failure to every caller that joined an
/// in-flight request and keeps it on the cached query state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SalesdeskError {
    /// A single-record operation matched no row
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or HTTP failure reaching the store or the webhook
    #[error("Transport error: {0}")]
    Transport(String),

    /// Required endpoint or credential configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The webhook payload does not match the documented envelope
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Local database failure or a row that cannot be decoded
    #[error("Storage error: {0}")]
    Storage(String),

    /// The request was superseded or discarded before its result was applied
    #[error("Request cancelled: {0}")]
    Cancelled(String),
}

impl SalesdeskError {
    /// Recover a `SalesdeskError` from an `anyhow::Error`.
    ///
    /// Errors that did not originate in this crate (for example a panic in a
    /// blocking task or an unexpected I/O failure) are classified as
    /// transport failures, which callers treat as retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use salesdesk::error::SalesdeskError;
    ///
    /// let err: anyhow::Error = SalesdeskError::NotFound("t1".into()).into();
    /// assert_eq!(
    ///     SalesdeskError::from_anyhow(&err),
    ///     SalesdeskError::NotFound("t1".into())
    /// );
    /// ```
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SalesdeskError>() {
            Some(e) => e.clone(),
            None => SalesdeskError::Transport(format!("{:#}", err)),
        }
    }

    /// Whether a caller-initiated retry can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SalesdeskError::Transport(_)
                | SalesdeskError::InvalidResponse(_)
                | SalesdeskError::Cancelled(_)
        )
    }
}

/// Result type alias for Salesdesk operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
