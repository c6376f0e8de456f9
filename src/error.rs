//! Error classification for retry decisions.
//!
//! Errors self-describe whether a retry can help, so retry loops branch on
//! [`ErrorClassification::is_transient`] instead of matching variants of
//! every error type they might see.

use std::time::Duration;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (rejected request, bad input)
    Permanent,
    /// Resource exhaustion (rate limits)
    ResourceExhausted,
    /// Configuration errors (missing settings, invalid paths)
    Configuration,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_secs(5)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}
