//! gRPC transport for the ydbx client SDK.
//!
//! Provides the pieces the streaming subsystems build on:
//!
//! - [`pb`]: hand-maintained wire types for the coordination and topic
//!   streaming services
//! - [`bidi`]: the reconnectable request/response multiplexer over one
//!   bidirectional stream
//! - [`raw`]: thin tonic clients for the two streaming RPCs
//! - [`driver`]: channel ownership, token refresh, transport factories
//! - [`credentials`]: token providers and the auth ticket interceptor
//! - [`status`]: mapping wire statuses into the SDK error taxonomy

pub mod bidi;
pub mod credentials;
pub mod driver;
pub mod pb;
pub mod raw;
pub mod status;

pub use bidi::{BidiTransport, FrameAction, StreamHooks, StreamSession};
pub use credentials::{
    AnonymousCredentials, AuthTicketInterceptor, Credentials, StaticCredentials, TokenSlot,
    AUTH_TICKET_HEADER,
};
pub use driver::{CoordinationGrpcTransport, Driver, DriverConfig, TopicWriteGrpcTransport};
pub use raw::{ClientTransport, RawCoordinationClient, RawTopicClient};
pub use status::{check_server_status, from_grpc_status};
