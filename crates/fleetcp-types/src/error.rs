//! Error types and handling for fleetcp
//!
//! This module provides the error taxonomy shared by every fleetcp crate:
//! connection-level failures, command failures, validation rejections,
//! cancellation, and timeouts, each mapped to a kind and severity so callers
//! can decide between fallback, abort, and plain per-item accounting.

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - operation should be retried or counted per item
    Medium,
    /// High severity - operation should be aborted
    High,
}

/// Main error type for fleetcp operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Authentication or transport failure to a host
    #[error("Connection error ({host}): {message}")]
    Connection {
        /// Host the connection was addressed to
        host: String,
        /// Error message from the transport or authentication layer
        message: String,
    },

    /// Nonzero exit from a copy/delete/rename command
    #[error("Command failed with exit code {exit_code}: {message}")]
    Command {
        /// Exit code reported by the tool
        exit_code: i32,
        /// Captured stderr or a summary of the failure
        message: String,
    },

    /// Malformed submit request, rejected before any work starts
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the rejected field or condition
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Tool exceeded its execution ceiling
    #[error("Operation timed out after {seconds} seconds")]
    Timeout {
        /// Number of seconds after which the operation timed out
        seconds: u64,
    },

    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Tool output could not be parsed
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the unparseable output
        message: String,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level errors
    Connection,
    /// Command execution errors
    Command,
    /// Request validation errors
    Validation,
    /// Cancellation
    Cancelled,
    /// Timeout
    Timeout,
    /// I/O related errors
    Io,
    /// Configuration errors
    Config,
    /// Output parsing errors
    Parse,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Command { .. } => ErrorKind::Command,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } => ErrorKind::Config,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection { .. } => ErrorSeverity::High,
            Self::Command { .. } | Self::Timeout { .. } => ErrorSeverity::Medium,
            Self::Validation { .. } | Self::Config { .. } => ErrorSeverity::High,
            Self::Cancelled => ErrorSeverity::Low,
            Self::Io { .. } | Self::Parse { .. } | Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Whether a sequential queue should keep running after this error.
    ///
    /// Connection-level failures poison every remaining item on the same
    /// host; command-level failures stay confined to their item.
    pub fn aborts_queue(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether this error counts as a per-item command failure. Timeouts
    /// are enforced by the process layer and reported the same way.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::Command { .. } | Self::Timeout { .. })
    }

    /// Create a new connection error
    pub fn connection<H: Into<String>, S: Into<String>>(host: H, message: S) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a new command error
    pub fn command<S: Into<String>>(exit_code: i32, message: S) -> Self {
        Self::Command {
            exit_code,
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::connection("10.0.0.2", "auth failed").kind(),
            ErrorKind::Connection
        );
        assert_eq!(Error::command(23, "rsync").kind(), ErrorKind::Command);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::timeout(600).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_queue_abort_policy() {
        assert!(Error::connection("nas", "unreachable").aborts_queue());
        assert!(!Error::command(1, "cp: no such file").aborts_queue());
        assert!(!Error::timeout(600).aborts_queue());
    }

    #[test]
    fn test_timeout_counts_as_command_failure() {
        assert!(Error::timeout(600).is_command_failure());
        assert!(Error::command(1, "x").is_command_failure());
        assert!(!Error::Cancelled.is_command_failure());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Error::Cancelled.severity() < Error::command(1, "x").severity());
        assert!(Error::command(1, "x").severity() < Error::connection("h", "x").severity());
    }
}
