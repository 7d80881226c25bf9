//! Cooperative cancellation for executor workers.
//!
//! A `CancellationToken` is shared by every worker of a run. The first worker
//! that hits a fatal outcome cancels it with a reason; the dispatcher stops
//! handing out new plan entries and in-flight copies observe the flag at
//! their next checkpoint. Copies are never interrupted mid-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A cloneable cancellation flag that remembers why it was raised.
///
/// # Example
///
/// ```
/// use modernizer_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
///
/// token.cancel_with_reason("checksum mismatch on B.dwg");
/// assert!(worker.is_cancelled());
/// assert_eq!(worker.reason(), Some("checksum mismatch on B.dwg"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    reason: OnceLock<String>,
}

impl CancellationToken {
    /// Create a new, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation without a reason.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Request cancellation and record the reason.
    ///
    /// Only the first reason is kept; later calls still cancel but do not
    /// overwrite it.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let _ = self.inner.reason.set(reason.into());
        self.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The first recorded cancellation reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    /// Return `Err(CancelledError)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

/// Error returned when an operation observes cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::ModernizerError {
    fn from(_: CancelledError) -> Self {
        crate::error::ModernizerError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancellationToken::new();
        let worker = token.clone();
        worker.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel_with_reason("timeout on A.dwg");
        token.cancel_with_reason("checksum mismatch on B.dwg");
        assert_eq!(token.reason(), Some("timeout on A.dwg"));
    }

    #[test]
    fn test_cancelled_error_converts() {
        let err: crate::error::ModernizerError = CancelledError.into();
        assert!(matches!(err, crate::error::ModernizerError::Cancelled));
    }
}
