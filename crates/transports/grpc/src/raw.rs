//! Raw tonic clients for the streaming services.
//!
//! These are hand-written in the shape tonic codegen emits: a
//! `tonic::client::Grpc` wrapper, a static method path, and a prost codec
//! per call. Only the two bidi streaming methods the SDK core needs exist
//! here.

use futures::Stream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::codegen::InterceptedService;
use tonic::{IntoStreamingRequest, Status, Streaming};

use crate::credentials::AuthTicketInterceptor;
use crate::pb::coordination::{SessionRequest, SessionResponse};
use crate::pb::topic::{FromClient, FromServer};

/// The channel every raw client runs on: an HTTP/2 channel with the auth
/// ticket interceptor in front.
pub type ClientTransport = InterceptedService<Channel, AuthTicketInterceptor>;

const COORDINATION_SESSION_PATH: &str = "/Ydb.Coordination.V1.CoordinationService/Session";
const TOPIC_STREAM_WRITE_PATH: &str = "/Ydb.Topic.V1.TopicService/StreamWrite";

/// Client for the coordination service's session stream.
pub struct RawCoordinationClient {
    inner: tonic::client::Grpc<ClientTransport>,
}

impl RawCoordinationClient {
    pub fn new(channel: Channel, interceptor: AuthTicketInterceptor) -> Self {
        let inner = tonic::client::Grpc::new(InterceptedService::new(channel, interceptor));
        RawCoordinationClient { inner }
    }

    /// Open the bidirectional session stream.
    pub async fn session(
        &mut self,
        outbound: impl Stream<Item = SessionRequest> + Send + 'static,
    ) -> std::result::Result<Streaming<SessionResponse>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(COORDINATION_SESSION_PATH);
        self.inner
            .streaming(outbound.into_streaming_request(), path, codec)
            .await
            .map(|response| response.into_inner())
    }
}

/// Client for the topic service's write stream.
pub struct RawTopicClient {
    inner: tonic::client::Grpc<ClientTransport>,
}

impl RawTopicClient {
    pub fn new(channel: Channel, interceptor: AuthTicketInterceptor) -> Self {
        let inner = tonic::client::Grpc::new(InterceptedService::new(channel, interceptor));
        RawTopicClient { inner }
    }

    /// Open the bidirectional write stream.
    pub async fn stream_write(
        &mut self,
        outbound: impl Stream<Item = FromClient> + Send + 'static,
    ) -> std::result::Result<Streaming<FromServer>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(TOPIC_STREAM_WRITE_PATH);
        self.inner
            .streaming(outbound.into_streaming_request(), path, codec)
            .await
            .map(|response| response.into_inner())
    }
}
