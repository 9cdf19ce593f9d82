//! Coordination service session stream messages.

use super::IssueMessage;

/// Opaque ping/pong payload; the pong echoes the ping's value.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PingPong {
    #[prost(uint64, tag = "1")]
    pub opaque: u64,
}

/// Starts (or resumes) a session on a freshly opened stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionStart {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    /// 0 on the very first start; the server-assigned id on resume.
    #[prost(uint64, tag = "2")]
    pub session_id: u64,
    #[prost(uint64, tag = "3")]
    pub timeout_millis: u64,
    #[prost(string, tag = "4")]
    pub description: ::prost::alloc::string::String,
    /// Strictly increasing per client session; lets the server discard
    /// stale start attempts racing a reconnect.
    #[prost(uint64, tag = "5")]
    pub seq_no: u64,
}

/// Requests a graceful session stop.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SessionStop {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub timeout_millis: u64,
    #[prost(uint64, tag = "4")]
    pub count: u64,
    #[prost(bytes = "vec", tag = "5")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "6")]
    pub ephemeral: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DescribeSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub include_owners: bool,
    #[prost(bool, tag = "4")]
    pub include_waiters: bool,
    #[prost(bool, tag = "5")]
    pub watch_data: bool,
    #[prost(bool, tag = "6")]
    pub watch_owners: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub limit: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSemaphore {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub force: bool,
}

/// Client → server frame on the session stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionRequest {
    #[prost(
        oneof = "session_request::Request",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10"
    )]
    pub request: ::core::option::Option<session_request::Request>,
}

pub mod session_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Ping(super::PingPong),
        #[prost(message, tag = "2")]
        Pong(super::PingPong),
        #[prost(message, tag = "3")]
        SessionStart(super::SessionStart),
        #[prost(message, tag = "4")]
        SessionStop(super::SessionStop),
        #[prost(message, tag = "5")]
        AcquireSemaphore(super::AcquireSemaphore),
        #[prost(message, tag = "6")]
        ReleaseSemaphore(super::ReleaseSemaphore),
        #[prost(message, tag = "7")]
        DescribeSemaphore(super::DescribeSemaphore),
        #[prost(message, tag = "8")]
        CreateSemaphore(super::CreateSemaphore),
        #[prost(message, tag = "9")]
        UpdateSemaphore(super::UpdateSemaphore),
        #[prost(message, tag = "10")]
        DeleteSemaphore(super::DeleteSemaphore),
    }
}

impl SessionRequest {
    /// Wrap a oneof variant into a frame.
    pub fn from_request(request: session_request::Request) -> Self {
        SessionRequest {
            request: Some(request),
        }
    }
}

/// The stream itself failed; the session may or may not survive.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Failure {
    #[prost(enumeration = "super::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SessionStarted {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub timeout_millis: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SessionStopped {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
}

/// Informational: the semaphore is contended and the acquire is queued.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AcquireSemaphorePending {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
    #[prost(bool, tag = "4")]
    pub acquired: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
    #[prost(bool, tag = "4")]
    pub released: bool,
}

/// One session holding or waiting on a semaphore.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SemaphoreSession {
    #[prost(uint64, tag = "1")]
    pub order_id: u64,
    #[prost(uint64, tag = "2")]
    pub session_id: u64,
    #[prost(uint64, tag = "3")]
    pub timeout_millis: u64,
    #[prost(uint64, tag = "4")]
    pub count: u64,
    #[prost(bytes = "vec", tag = "5")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SemaphoreDescription {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub count: u64,
    #[prost(uint64, tag = "4")]
    pub limit: u64,
    #[prost(bool, tag = "5")]
    pub ephemeral: bool,
    #[prost(message, repeated, tag = "6")]
    pub owners: ::prost::alloc::vec::Vec<SemaphoreSession>,
    #[prost(message, repeated, tag = "7")]
    pub waiters: ::prost::alloc::vec::Vec<SemaphoreSession>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DescribeSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
    #[prost(message, optional, tag = "4")]
    pub semaphore_description: ::core::option::Option<SemaphoreDescription>,
    #[prost(bool, tag = "5")]
    pub watch_added: bool,
}

/// Fires at most once per watch-registering describe.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DescribeSemaphoreChanged {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(bool, tag = "2")]
    pub data_changed: bool,
    #[prost(bool, tag = "3")]
    pub owners_changed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSemaphoreResult {
    #[prost(uint64, tag = "1")]
    pub req_id: u64,
    #[prost(enumeration = "super::StatusCode", tag = "2")]
    pub status: i32,
    #[prost(message, repeated, tag = "3")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

/// Server → client frame on the session stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionResponse {
    #[prost(
        oneof = "session_response::Response",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13"
    )]
    pub response: ::core::option::Option<session_response::Response>,
}

pub mod session_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Ping(super::PingPong),
        #[prost(message, tag = "2")]
        Pong(super::PingPong),
        #[prost(message, tag = "3")]
        Failure(super::Failure),
        #[prost(message, tag = "4")]
        SessionStarted(super::SessionStarted),
        #[prost(message, tag = "5")]
        SessionStopped(super::SessionStopped),
        #[prost(message, tag = "6")]
        AcquireSemaphorePending(super::AcquireSemaphorePending),
        #[prost(message, tag = "7")]
        AcquireSemaphoreResult(super::AcquireSemaphoreResult),
        #[prost(message, tag = "8")]
        ReleaseSemaphoreResult(super::ReleaseSemaphoreResult),
        #[prost(message, tag = "9")]
        DescribeSemaphoreResult(super::DescribeSemaphoreResult),
        #[prost(message, tag = "10")]
        DescribeSemaphoreChanged(super::DescribeSemaphoreChanged),
        #[prost(message, tag = "11")]
        CreateSemaphoreResult(super::CreateSemaphoreResult),
        #[prost(message, tag = "12")]
        UpdateSemaphoreResult(super::UpdateSemaphoreResult),
        #[prost(message, tag = "13")]
        DeleteSemaphoreResult(super::DeleteSemaphoreResult),
    }
}

impl SessionResponse {
    /// Wrap a oneof variant into a frame.
    pub fn from_response(response: session_response::Response) -> Self {
        SessionResponse {
            response: Some(response),
        }
    }

    /// The request id this frame answers, if it is a tagged result.
    ///
    /// `acquireSemaphorePending` and `describeSemaphoreChanged` carry a
    /// request id but are *not* results: they must not resolve the pending
    /// entry for that id.
    pub fn request_id(&self) -> Option<u64> {
        use session_response::Response;
        match self.response.as_ref()? {
            Response::AcquireSemaphoreResult(r) => Some(r.req_id),
            Response::ReleaseSemaphoreResult(r) => Some(r.req_id),
            Response::DescribeSemaphoreResult(r) => Some(r.req_id),
            Response::CreateSemaphoreResult(r) => Some(r.req_id),
            Response::UpdateSemaphoreResult(r) => Some(r.req_id),
            Response::DeleteSemaphoreResult(r) => Some(r.req_id),
            _ => None,
        }
    }

    /// Status and issues of a tagged result frame.
    pub fn result_status(&self) -> Option<(i32, &[IssueMessage])> {
        use session_response::Response;
        match self.response.as_ref()? {
            Response::AcquireSemaphoreResult(r) => Some((r.status, &r.issues)),
            Response::ReleaseSemaphoreResult(r) => Some((r.status, &r.issues)),
            Response::DescribeSemaphoreResult(r) => Some((r.status, &r.issues)),
            Response::CreateSemaphoreResult(r) => Some((r.status, &r.issues)),
            Response::UpdateSemaphoreResult(r) => Some((r.status, &r.issues)),
            Response::DeleteSemaphoreResult(r) => Some((r.status, &r.issues)),
            _ => None,
        }
    }
}
