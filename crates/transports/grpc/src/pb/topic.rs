//! Topic service write stream messages.

use super::IssueMessage;

/// Identifies the transaction a write request belongs to.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionIdentity {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub session_id: ::prost::alloc::string::String,
}

/// User-supplied key/value pair attached to a message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataItem {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

/// First client frame on a write stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub producer_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub get_last_seq_no: bool,
    #[prost(oneof = "init_request::Partitioning", tags = "4, 5")]
    pub partitioning: ::core::option::Option<init_request::Partitioning>,
}

pub mod init_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Partitioning {
        #[prost(string, tag = "4")]
        MessageGroupId(::prost::alloc::string::String),
        #[prost(int64, tag = "5")]
        PartitionId(i64),
    }
}

/// One message inside a write request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageData {
    #[prost(int64, tag = "1")]
    pub seq_no: i64,
    #[prost(message, optional, tag = "2")]
    pub created_at: ::core::option::Option<::prost_types::Timestamp>,
    /// Payload, possibly compressed with the request's codec.
    #[prost(bytes = "bytes", tag = "3")]
    pub data: ::prost::bytes::Bytes,
    #[prost(int64, tag = "4")]
    pub uncompressed_size: i64,
    #[prost(message, repeated, tag = "5")]
    pub metadata_items: ::prost::alloc::vec::Vec<MetadataItem>,
}

/// A batch of messages sharing one codec (and optionally a transaction).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub messages: ::prost::alloc::vec::Vec<MessageData>,
    #[prost(int32, tag = "2")]
    pub codec: i32,
    #[prost(message, optional, tag = "3")]
    pub tx: ::core::option::Option<TransactionIdentity>,
}

/// Pushes a refreshed auth token onto a live stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateTokenRequest {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
}

/// Client → server frame on the write stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromClient {
    #[prost(oneof = "from_client::ClientMessage", tags = "1, 2, 3")]
    pub client_message: ::core::option::Option<from_client::ClientMessage>,
}

pub mod from_client {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ClientMessage {
        #[prost(message, tag = "1")]
        InitRequest(super::InitRequest),
        #[prost(message, tag = "2")]
        WriteRequest(super::WriteRequest),
        #[prost(message, tag = "3")]
        UpdateTokenRequest(super::UpdateTokenRequest),
    }
}

impl FromClient {
    /// Wrap a oneof variant into a frame.
    pub fn from_message(message: from_client::ClientMessage) -> Self {
        FromClient {
            client_message: Some(message),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitResponse {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    /// Highest seqNo the server has persisted for this producer id.
    #[prost(int64, tag = "2")]
    pub last_seq_no: i64,
    #[prost(int64, tag = "3")]
    pub partition_id: i64,
    #[prost(int32, repeated, tag = "4")]
    pub supported_codecs: ::prost::alloc::vec::Vec<i32>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Written {
    #[prost(int64, tag = "1")]
    pub offset: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Skipped {
    #[prost(enumeration = "skipped::Reason", tag = "1")]
    pub reason: i32,
}

pub mod skipped {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Reason {
        Unspecified = 0,
        AlreadyWritten = 1,
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct WrittenInTx {}

/// Acknowledgment for one seqNo.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteAck {
    #[prost(int64, tag = "1")]
    pub seq_no: i64,
    #[prost(oneof = "write_ack::MessageWriteStatus", tags = "2, 3, 4")]
    pub message_write_status: ::core::option::Option<write_ack::MessageWriteStatus>,
}

pub mod write_ack {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MessageWriteStatus {
        #[prost(message, tag = "2")]
        Written(super::Written),
        #[prost(message, tag = "3")]
        Skipped(super::Skipped),
        #[prost(message, tag = "4")]
        WrittenInTx(super::WrittenInTx),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteResponse {
    #[prost(message, repeated, tag = "1")]
    pub acks: ::prost::alloc::vec::Vec<WriteAck>,
    #[prost(int64, tag = "2")]
    pub partition_id: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct UpdateTokenResponse {}

/// Server → client frame on the write stream. The status/issues envelope
/// applies to the stream as a whole; a non-success status ends it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromServer {
    #[prost(enumeration = "super::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
    #[prost(oneof = "from_server::ServerMessage", tags = "3, 4, 5")]
    pub server_message: ::core::option::Option<from_server::ServerMessage>,
}

pub mod from_server {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ServerMessage {
        #[prost(message, tag = "3")]
        InitResponse(super::InitResponse),
        #[prost(message, tag = "4")]
        WriteResponse(super::WriteResponse),
        #[prost(message, tag = "5")]
        UpdateTokenResponse(super::UpdateTokenResponse),
    }
}

impl FromServer {
    /// Wrap a oneof variant into a successful frame.
    pub fn from_message(message: from_server::ServerMessage) -> Self {
        FromServer {
            status: super::StatusCode::Success as i32,
            issues: Vec::new(),
            server_message: Some(message),
        }
    }
}
