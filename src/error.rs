//! Error types for auto-coder.rag interactions.

use thiserror::Error;

/// Errors that can occur when driving the auto-coder.rag CLI.
#[derive(Error, Debug)]
pub enum RagClientError {
    /// Caller-supplied configuration or options violate a precondition.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Document directory does not exist or is not readable.
    #[error("document directory not accessible: {path}")]
    DocDirNotAccessible { path: String },

    /// Process ran and exited with a non-zero status.
    #[error("auto-coder.rag exited with code {}: {output}", display_code(.exit_code))]
    ProcessFailed {
        exit_code: Option<i32>,
        output: String,
    },

    /// Process was killed after exceeding its deadline.
    #[error("timeout after {seconds}s waiting for auto-coder.rag")]
    Timeout { seconds: u64, output: String },

    /// Binary could not be resolved.
    #[error("auto-coder.rag binary not found: {binary}. Install with: pip install -U auto-coder")]
    NotFound { binary: String },

    /// Failed to spawn the process.
    #[error("failed to spawn auto-coder.rag process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured output did not match the expected schema.
    #[error("failed to parse auto-coder.rag output: {message}")]
    ParseError { message: String, raw_output: String },
}

/// Coarse classification of [`RagClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Precondition violated before any process was spawned.
    Validation,
    /// The external process failed or was terminated.
    Execution,
    /// Local infrastructure fault (binary, pipes, malformed output).
    Rag,
}

impl RagClientError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Which of the three error classes this belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::DocDirNotAccessible { .. } => ErrorKind::Validation,
            Self::ProcessFailed { .. } | Self::Timeout { .. } => ErrorKind::Execution,
            Self::NotFound { .. } | Self::SpawnFailed(_) | Self::Io(_) | Self::ParseError { .. } => {
                ErrorKind::Rag
            }
        }
    }

    /// Exit code reported by the operating system, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ProcessFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Diagnostic output captured from the process.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::ProcessFailed { output, .. } | Self::Timeout { output, .. } => Some(output),
            Self::ParseError { raw_output, .. } => Some(raw_output),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

/// Result type alias for auto-coder.rag operations.
pub type Result<T> = std::result::Result<T, RagClientError>;
