//! Error types for the ydbx client SDK

use thiserror::Error;

/// Result type alias for ydbx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-classification of transport failures.
///
/// The gRPC layer maps channel-level status codes onto these; everything the
/// retry machinery needs to know about a transport error is captured here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The channel is (temporarily) unavailable
    Unavailable,
    /// The call was cancelled at the transport level, e.g. by channel rotation
    Cancelled,
    /// The call ran past its transport deadline
    TimedOut,
    /// The stream ended or broke in an unclassified way
    Broken,
}

/// Error types that can occur in the ydbx client SDK
///
/// Cloneable so one terminal error can fan out to every waiter on a
/// closing stream.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Channel-level failure (unavailable, cancelled, broken stream)
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        /// What flavor of transport failure this is
        kind: TransportKind,
        /// Human-readable detail
        message: String,
    },

    /// The server invalidated the session; acquired resources are released
    #[error("session expired")]
    SessionExpired,

    /// The server does not recognize the session id
    #[error("bad session")]
    BadSession,

    /// Server-side failure that is expected to clear on re-attempt
    #[error("retryable server error {status}: {message}")]
    RetryableServer {
        /// Server status name (e.g. OVERLOADED, ABORTED)
        status: String,
        /// Joined issue messages
        message: String,
    },

    /// Server-side failure that will not clear on re-attempt
    #[error("server error {status}: {message}")]
    NonRetryableServer {
        /// Server status name (e.g. BAD_REQUEST, ALREADY_EXISTS, NOT_FOUND)
        status: String,
        /// Joined issue messages
        message: String,
    },

    /// The peer violated the wire protocol (missing operation, unexpected frame)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A single message exceeds the server-side payload limit
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offending payload size in bytes
        size: usize,
        /// The enforced limit in bytes
        max: usize,
    },

    /// Messages with and without explicit seqNos were mixed on one writer
    #[error("cannot mix explicit and auto-assigned seqNos on one writer")]
    SeqNoModeConflict,

    /// A manual seqNo was not strictly greater than the previous one
    #[error("seqNo {seq_no} is not greater than the last submitted seqNo {highest}")]
    SeqNoRegression {
        /// The rejected seqNo
        seq_no: i64,
        /// The highest seqNo submitted so far
        highest: i64,
    },

    /// A message referenced a codec id with no registered implementation
    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u32),

    /// The operation was cancelled through its [`Ctx`](crate::Ctx)
    #[error("operation cancelled")]
    Cancelled,

    /// The operation ran past its [`Ctx`](crate::Ctx) deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The session or writer was already closed
    #[error("session closed")]
    Closed,

    /// Codec-level I/O failure while (de)compressing
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Shorthand for an unclassified transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            kind: TransportKind::Broken,
            message: message.into(),
        }
    }

    /// Whether a unary-style operation may be re-attempted after this error.
    ///
    /// Transport `CANCELLED` is deliberately *not* retryable here; streams
    /// use [`Error::is_stream_retryable`] instead, which is.
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            Error::Transport {
                kind: TransportKind::Cancelled,
                ..
            } => false,
            Error::Transport { .. } => idempotent,
            Error::SessionExpired | Error::BadSession => idempotent,
            Error::RetryableServer { .. } => idempotent,
            _ => false,
        }
    }

    /// Whether a long-lived stream should reconnect after this error.
    ///
    /// Streams always reconnect on transport trouble, including `CANCELLED`:
    /// periodic discovery-driven channel rotation cancels healthy streams and
    /// must not kill the session.
    pub fn is_stream_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::SessionExpired
                | Error::BadSession
                | Error::RetryableServer { .. }
        )
    }

    /// True when the server reported the name, e.g. `ALREADY_EXISTS`.
    pub fn has_server_status(&self, name: &str) -> bool {
        match self {
            Error::RetryableServer { status, .. } | Error::NonRetryableServer { status, .. } => {
                status == name
            }
            _ => false,
        }
    }
}
