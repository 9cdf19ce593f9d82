//! Coordination service client for the ydbx SDK.
//!
//! Exposes [`CoordinationSession`]: a reconnecting session over one
//! bidirectional stream that owns distributed semaphore operations
//! (acquire/release/create/update/delete/describe), answers server pings,
//! re-establishes the same session id across reconnects, and fans out
//! semaphore watch notifications and session-expiry events.

pub mod options;
pub mod session;

pub use options::{
    AcquireSemaphoreOptions, CreateSemaphoreOptions, DescribeSemaphoreOptions,
    DescribeSemaphoreResult, SemaphoreDescription, SemaphoreSessionInfo, SessionOptions,
};
pub use session::{CoordinationClient, CoordinationSession, SessionEvent};
