//! Error types for the tasklet runtime
//!
//! Every error crossing the public boundary carries a stable numeric code
//! so callers can match on it without string comparison. Codes never change
//! between releases; new codes are only appended.

use core::fmt;
use std::error::Error;

/// Result type for runtime operations
pub type TaskResult<T> = Result<T, ErrorInfo>;

/// Stable error codes for the public API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Null job, empty batch, or nonsensical configuration
    InvalidArgument = 1,

    /// Dequeue on an empty or stopped queue
    QueueEmpty = 2,

    /// Bounded queue full under the Reject overflow policy
    QueueFull = 3,

    /// Enqueue after stop
    QueueStopped = 4,

    /// start() on a pool that is already running
    AlreadyRunning = 5,

    /// start() with zero workers
    NoWorkers = 6,

    /// Panic or failure inside a job body
    JobExecutionFailed = 7,

    /// Cancelled before or after dispatch
    OperationCancelled = 8,

    /// Circuit breaker is open
    CircuitOpen = 9,

    /// Circuit breaker is half-open and at trial capacity
    CircuitHalfOpen = 10,

    /// Per-thread hazard pointer slots exhausted
    HazardExhausted = 11,

    /// Timed wait elapsed without completion
    Timeout = 12,
}

impl ErrorCode {
    /// Numeric value of this code (stable across releases)
    #[inline]
    pub const fn value(&self) -> u16 {
        *self as u16
    }

    /// Short name used in log output and Display
    pub const fn name(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::QueueEmpty => "queue empty",
            ErrorCode::QueueFull => "queue full",
            ErrorCode::QueueStopped => "queue stopped",
            ErrorCode::AlreadyRunning => "already running",
            ErrorCode::NoWorkers => "no workers",
            ErrorCode::JobExecutionFailed => "job execution failed",
            ErrorCode::OperationCancelled => "operation cancelled",
            ErrorCode::CircuitOpen => "circuit open",
            ErrorCode::CircuitHalfOpen => "circuit half-open",
            ErrorCode::HazardExhausted => "hazard slots exhausted",
            ErrorCode::Timeout => "timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Structured error value carried through results and futures
///
/// `code` is the stable discriminant; `message` is free-form diagnostic
/// text; `source` optionally chains the underlying error.
#[derive(Debug)]
pub struct ErrorInfo {
    /// Stable error code
    pub code: ErrorCode,

    /// Human-readable message (may be empty)
    pub message: String,

    /// Underlying cause, if any
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl ErrorInfo {
    /// Create an error with just a code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: String::new(),
            source: None,
        }
    }

    /// Create an error with a code and message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Stable numeric code
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// True if this error represents cancellation
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::OperationCancelled
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} (code {})", self.code, self.code.value())
        } else {
            write!(f, "{} (code {}): {}", self.code, self.code.value(), self.message)
        }
    }
}

impl Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

impl Clone for ErrorInfo {
    fn clone(&self) -> Self {
        // The source chain is not cloneable; keep its text instead.
        let message = match (&self.source, self.message.is_empty()) {
            (Some(src), true) => format!("{}", src),
            (Some(src), false) => format!("{}: {}", self.message, src),
            (None, _) => self.message.clone(),
        };
        Self {
            code: self.code,
            message,
            source: None,
        }
    }
}

impl PartialEq for ErrorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl From<ErrorCode> for ErrorInfo {
    fn from(code: ErrorCode) -> Self {
        ErrorInfo::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values_are_stable() {
        assert_eq!(ErrorCode::InvalidArgument.value(), 1);
        assert_eq!(ErrorCode::QueueEmpty.value(), 2);
        assert_eq!(ErrorCode::QueueFull.value(), 3);
        assert_eq!(ErrorCode::QueueStopped.value(), 4);
        assert_eq!(ErrorCode::AlreadyRunning.value(), 5);
        assert_eq!(ErrorCode::NoWorkers.value(), 6);
        assert_eq!(ErrorCode::JobExecutionFailed.value(), 7);
        assert_eq!(ErrorCode::OperationCancelled.value(), 8);
        assert_eq!(ErrorCode::CircuitOpen.value(), 9);
        assert_eq!(ErrorCode::CircuitHalfOpen.value(), 10);
        assert_eq!(ErrorCode::HazardExhausted.value(), 11);
        assert_eq!(ErrorCode::Timeout.value(), 12);
    }

    #[test]
    fn test_error_display() {
        let e = ErrorInfo::new(ErrorCode::QueueStopped);
        assert_eq!(format!("{}", e), "queue stopped (code 4)");

        let e = ErrorInfo::with_message(ErrorCode::QueueFull, "capacity 16 reached");
        assert_eq!(format!("{}", e), "queue full (code 3): capacity 16 reached");
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let e = ErrorInfo::with_message(ErrorCode::JobExecutionFailed, "job blew up").with_source(io);
        assert!(e.source().is_some());
        assert_eq!(format!("{}", e.source().unwrap()), "disk on fire");
    }

    #[test]
    fn test_clone_flattens_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let e = ErrorInfo::with_message(ErrorCode::JobExecutionFailed, "outer").with_source(io);
        let c = e.clone();
        assert!(c.source.is_none());
        assert_eq!(c.message, "outer: inner");
        assert_eq!(c.code, ErrorCode::JobExecutionFailed);
    }

    #[test]
    fn test_from_code() {
        let e: ErrorInfo = ErrorCode::OperationCancelled.into();
        assert!(e.is_cancelled());
    }
}
