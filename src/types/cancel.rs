//! Cancellation reason and kind types.
//!
//! A [`CancelReason`] is recorded on a context the first time it is cancelled
//! and inherited unchanged by every descendant.

use crate::error::ContextError;
use core::fmt;

/// The kind of cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation through a cancel handle (or its drop).
    User,
    /// The context deadline passed.
    Timeout,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a context was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a deadline-exceeded reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns true if the deadline caused this cancellation.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, CancelKind::Timeout)
    }

    /// The error `Context::err` reports for this reason.
    #[must_use]
    pub const fn as_error(&self) -> ContextError {
        match self.kind {
            CancelKind::User => ContextError::Cancelled,
            CancelKind::Timeout => ContextError::DeadlineExceeded,
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}
