//! Session configuration and semaphore operation parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ydbx_grpc::pb::coordination as pb;

/// Configuration for a coordination session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// How long the server keeps the session alive without a connection.
    pub timeout: Duration,
    /// How long one `sessionStart` attempt may wait for `sessionStarted`
    /// before the connection is torn down and retried.
    pub start_timeout: Duration,
    /// Free-form session description shown in server introspection.
    pub description: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            timeout: Duration::from_secs(30),
            start_timeout: Duration::from_secs(5),
            description: String::new(),
        }
    }
}

impl SessionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Parameters for acquiring a semaphore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireSemaphoreOptions {
    pub name: String,
    /// How many units to take.
    pub count: u64,
    /// How long the server may queue the acquire; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Data attached to this ownership entry.
    pub data: Vec<u8>,
    /// Create the semaphore on first acquire and drop it with the session.
    pub ephemeral: bool,
}

impl AcquireSemaphoreOptions {
    pub fn new(name: impl Into<String>) -> Self {
        AcquireSemaphoreOptions {
            name: name.into(),
            count: 1,
            timeout: None,
            data: Vec::new(),
            ephemeral: false,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }
}

/// Parameters for creating a semaphore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSemaphoreOptions {
    pub name: String,
    /// Maximum units the semaphore can hand out at once.
    pub limit: u64,
    pub data: Vec<u8>,
}

impl CreateSemaphoreOptions {
    pub fn new(name: impl Into<String>, limit: u64) -> Self {
        CreateSemaphoreOptions {
            name: name.into(),
            limit,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// Parameters for describing a semaphore and optionally watching it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeSemaphoreOptions {
    pub name: String,
    pub include_owners: bool,
    pub include_waiters: bool,
    /// One-shot notification when the semaphore data changes.
    pub watch_data: bool,
    /// One-shot notification when the owner set changes.
    pub watch_owners: bool,
}

impl DescribeSemaphoreOptions {
    pub fn new(name: impl Into<String>) -> Self {
        DescribeSemaphoreOptions {
            name: name.into(),
            include_owners: false,
            include_waiters: false,
            watch_data: false,
            watch_owners: false,
        }
    }

    pub fn with_owners(mut self) -> Self {
        self.include_owners = true;
        self
    }

    pub fn with_waiters(mut self) -> Self {
        self.include_waiters = true;
        self
    }

    pub fn watch_data(mut self) -> Self {
        self.watch_data = true;
        self
    }

    pub fn watch_owners(mut self) -> Self {
        self.watch_owners = true;
        self
    }

    pub(crate) fn registers_watch(&self) -> bool {
        self.watch_data || self.watch_owners
    }
}

/// One session holding or waiting on a semaphore.
#[derive(Debug, Clone)]
pub struct SemaphoreSessionInfo {
    pub order_id: u64,
    pub session_id: u64,
    pub timeout: Duration,
    pub count: u64,
    pub data: Vec<u8>,
}

impl From<pb::SemaphoreSession> for SemaphoreSessionInfo {
    fn from(pb: pb::SemaphoreSession) -> Self {
        SemaphoreSessionInfo {
            order_id: pb.order_id,
            session_id: pb.session_id,
            timeout: Duration::from_millis(pb.timeout_millis),
            count: pb.count,
            data: pb.data,
        }
    }
}

/// Snapshot of a semaphore returned by describe.
#[derive(Debug, Clone)]
pub struct SemaphoreDescription {
    pub name: String,
    pub data: Vec<u8>,
    /// Units currently held.
    pub count: u64,
    pub limit: u64,
    pub ephemeral: bool,
    /// Present when `include_owners` was requested.
    pub owners: Vec<SemaphoreSessionInfo>,
    /// Present when `include_waiters` was requested.
    pub waiters: Vec<SemaphoreSessionInfo>,
}

impl From<pb::SemaphoreDescription> for SemaphoreDescription {
    fn from(pb: pb::SemaphoreDescription) -> Self {
        SemaphoreDescription {
            name: pb.name,
            data: pb.data,
            count: pb.count,
            limit: pb.limit,
            ephemeral: pb.ephemeral,
            owners: pb.owners.into_iter().map(Into::into).collect(),
            waiters: pb.waiters.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of [`describe_semaphore`](crate::CoordinationSession::describe_semaphore).
#[derive(Debug, Clone)]
pub struct DescribeSemaphoreResult {
    pub description: SemaphoreDescription,
    /// Whether a one-shot watch was registered by this describe.
    pub watch_added: bool,
}
