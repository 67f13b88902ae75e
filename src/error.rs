//! Error types for the stream client.

use thiserror::Error;

/// Server message fragment for an explicit id at or below the stream top.
const ID_ORDERING_MARKER: &str = "equal or smaller than the target stream top item";

/// Server error prefix for a consumer group that already exists.
const BUSYGROUP_PREFIX: &str = "BUSYGROUP";

/// Main error type for stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream id {input:?}: {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("invalid usage: {0}")]
    Usage(&'static str),

    #[error("{command} failed: {message}")]
    Protocol {
        command: &'static str,
        message: String,
    },

    #[error("{command} rejected id: {message}")]
    IdOrdering {
        command: &'static str,
        message: String,
    },

    #[error("consumer group already exists: {message}")]
    GroupAlreadyExists { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    pub(crate) fn parse(input: &str, reason: &'static str) -> Self {
        StreamError::Parse {
            input: input.to_string(),
            reason,
        }
    }

    /// Classify a server error-marker reply.
    ///
    /// The message is kept verbatim; only the variant depends on its content.
    pub fn from_server(command: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.starts_with(BUSYGROUP_PREFIX) {
            StreamError::GroupAlreadyExists { message }
        } else if message.contains(ID_ORDERING_MARKER) {
            StreamError::IdOrdering { command, message }
        } else {
            StreamError::Protocol { command, message }
        }
    }

    /// A reply whose shape does not match what the command returns.
    pub(crate) fn unexpected(command: &'static str, what: impl std::fmt::Display) -> Self {
        StreamError::Protocol {
            command,
            message: format!("unexpected reply: {}", what),
        }
    }

    /// Whether the error was raised before anything reached the transport.
    pub fn is_local(&self) -> bool {
        matches!(self, StreamError::Parse { .. } | StreamError::Usage(_))
    }

    /// Whether a blocked call was interrupted by closing its transport handle.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    /// Stable error code string for adapters and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::Parse { .. } => "PARSE_ERROR",
            StreamError::Usage(_) => "USAGE_ERROR",
            StreamError::Protocol { .. } => "PROTOCOL_ERROR",
            StreamError::IdOrdering { .. } => "ID_ORDERING",
            StreamError::GroupAlreadyExists { .. } => "GROUP_EXISTS",
            StreamError::Cancelled => "CANCELLED",
            StreamError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

/// Failure reported by a [`CommandTransport`](crate::CommandTransport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The handle was closed or interrupted, possibly while blocked.
    #[error("transport closed")]
    Closed,

    #[error("io error: {0}")]
    Io(String),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => StreamError::Cancelled,
            TransportError::Io(message) => StreamError::Transport(message),
        }
    }
}
