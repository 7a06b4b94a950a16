use std::borrow::Cow;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No enabled tool has the requested name.
    UnknownTool,
    /// The input provided to the tool was invalid.
    InvalidInput,
    /// The tool tried to touch a path outside the allowed directories.
    AccessDenied,
    /// The input or the output exceeded the size ceiling.
    PayloadTooLarge,
    /// The tool did not finish before its deadline.
    Timeout,
    /// The tool was called too often within the current window.
    RateLimited,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// The turn was cancelled before the tool produced a result.
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownTool => write!(f, "Unknown tool"),
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::AccessDenied => write!(f, "Access denied"),
            ErrorKind::PayloadTooLarge => write!(f, "Payload too large"),
            ErrorKind::Timeout => write!(f, "Timed out"),
            ErrorKind::RateLimited => write!(f, "Rate limited"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Describes a tool call error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

macro_rules! error_constructors {
    ($($(#[$meta:meta])* $fn_name:ident => $kind:ident;)*) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $fn_name() -> Self {
                Self::new(ErrorKind::$kind)
            }
        )*
    };
}

impl Error {
    /// Creates a new error of the given kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    error_constructors! {
        /// Creates a new error with the `UnknownTool` kind.
        unknown_tool => UnknownTool;
        /// Creates a new error with the `InvalidInput` kind.
        invalid_input => InvalidInput;
        /// Creates a new error with the `AccessDenied` kind.
        access_denied => AccessDenied;
        /// Creates a new error with the `PayloadTooLarge` kind.
        payload_too_large => PayloadTooLarge;
        /// Creates a new error with the `Timeout` kind.
        timeout => Timeout;
        /// Creates a new error with the `RateLimited` kind.
        rate_limited => RateLimited;
        /// Creates a new error with the `ExecutionError` kind.
        execution_error => ExecutionError;
        /// Creates a new error with the `Cancelled` kind.
        cancelled => Cancelled;
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.kind, reason),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::access_denied().with_reason("/etc/passwd is blocked");
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert_eq!(err.to_string(), "Access denied: /etc/passwd is blocked");
        assert_eq!(Error::timeout().reason(), "Timed out");
    }
}
