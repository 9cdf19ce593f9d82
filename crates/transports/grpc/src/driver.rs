//! Driver: the connection-level entry point sessions and writers consume.
//!
//! The driver owns one HTTP/2 channel, keeps the auth token slot fresh from
//! its credentials provider, and hands out raw clients plus the
//! [`BidiTransport`] impls built on them. Endpoint discovery and channel
//! pooling are deliberately absent; the surface here is exactly what the
//! streaming subsystems need.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use ydbx_core::{Ctx, Error, Result, TransportKind};

use crate::bidi::BidiTransport;
use crate::credentials::{AnonymousCredentials, AuthTicketInterceptor, Credentials, TokenSlot};
use crate::pb::coordination::{SessionRequest, SessionResponse};
use crate::pb::topic::{FromClient, FromServer};
use crate::raw::{RawCoordinationClient, RawTopicClient};
use crate::status::from_grpc_status;

/// Connection configuration for a [`Driver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Endpoint URI, e.g. `http://localhost:2136`.
    pub endpoint: String,
    /// Database path announced to the server.
    pub database: String,
    /// TCP connect timeout.
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
}

impl DriverConfig {
    pub fn new(endpoint: impl Into<String>, database: impl Into<String>) -> Self {
        DriverConfig {
            endpoint: endpoint.into(),
            database: database.into(),
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Owns the channel and credentials; factory for raw clients.
pub struct Driver {
    config: DriverConfig,
    credentials: Arc<dyn Credentials>,
    slot: TokenSlot,
    channel: OnceCell<Channel>,
}

impl Driver {
    pub fn new(config: DriverConfig, credentials: Arc<dyn Credentials>) -> Arc<Self> {
        Arc::new(Driver {
            config,
            credentials,
            slot: TokenSlot::default(),
            channel: OnceCell::new(),
        })
    }

    /// Driver with no authentication, for local single-node setups.
    pub fn anonymous(config: DriverConfig) -> Arc<Self> {
        Self::new(config, Arc::new(AnonymousCredentials))
    }

    /// Resolve once the channel is connected and a token is cached.
    pub async fn ready(&self, ctx: &Ctx) -> Result<()> {
        self.refresh_token(false, ctx).await?;
        self.connected_channel(ctx).await?;
        Ok(())
    }

    /// The current cached auth bearer.
    pub fn token(&self) -> String {
        self.slot.get()
    }

    /// Fetch a token from the credentials provider and publish it to the
    /// interceptor slot.
    pub async fn refresh_token(&self, force: bool, ctx: &Ctx) -> Result<String> {
        let token = self.credentials.get_token(force, ctx).await?;
        self.slot.set(token.clone());
        Ok(token)
    }

    /// Raw client for the coordination service.
    pub async fn coordination_client(&self, ctx: &Ctx) -> Result<RawCoordinationClient> {
        let channel = self.connected_channel(ctx).await?;
        Ok(RawCoordinationClient::new(
            channel,
            AuthTicketInterceptor::new(self.slot.clone()),
        ))
    }

    /// Raw client for the topic service.
    pub async fn topic_client(&self, ctx: &Ctx) -> Result<RawTopicClient> {
        let channel = self.connected_channel(ctx).await?;
        Ok(RawTopicClient::new(
            channel,
            AuthTicketInterceptor::new(self.slot.clone()),
        ))
    }

    async fn connected_channel(&self, ctx: &Ctx) -> Result<Channel> {
        let channel = self
            .channel
            .get_or_try_init(|| async {
                info!(endpoint = %self.config.endpoint, "connecting channel");
                let mut endpoint = Endpoint::from_shared(self.config.endpoint.clone())
                    .map_err(|e| Error::transport(format!("invalid endpoint: {e}")))?;
                if let Some(timeout) = self.config.connect_timeout {
                    endpoint = endpoint.connect_timeout(timeout);
                }
                ctx.run(async {
                    endpoint.connect().await.map_err(|e| Error::Transport {
                        kind: TransportKind::Unavailable,
                        message: format!("connect failed: {e}"),
                    })
                })
                .await
            })
            .await?;
        Ok(channel.clone())
    }
}

/// [`BidiTransport`] over the coordination session stream.
pub struct CoordinationGrpcTransport {
    driver: Arc<Driver>,
}

impl CoordinationGrpcTransport {
    pub fn new(driver: Arc<Driver>) -> Self {
        CoordinationGrpcTransport { driver }
    }
}

#[async_trait]
impl BidiTransport<SessionRequest, SessionResponse> for CoordinationGrpcTransport {
    async fn open(
        &self,
        outbound: BoxStream<'static, SessionRequest>,
        ctx: &Ctx,
    ) -> Result<BoxStream<'static, Result<SessionResponse>>> {
        self.driver.ready(ctx).await?;
        let mut client = self.driver.coordination_client(ctx).await?;
        let streaming = ctx
            .run(async {
                client
                    .session(outbound)
                    .await
                    .map_err(|s| from_grpc_status(&s))
            })
            .await?;
        debug!("coordination stream established");
        Ok(streaming
            .map(|frame| frame.map_err(|s| from_grpc_status(&s)))
            .boxed())
    }
}

/// [`BidiTransport`] over the topic write stream.
pub struct TopicWriteGrpcTransport {
    driver: Arc<Driver>,
}

impl TopicWriteGrpcTransport {
    pub fn new(driver: Arc<Driver>) -> Self {
        TopicWriteGrpcTransport { driver }
    }
}

#[async_trait]
impl BidiTransport<FromClient, FromServer> for TopicWriteGrpcTransport {
    async fn open(
        &self,
        outbound: BoxStream<'static, FromClient>,
        ctx: &Ctx,
    ) -> Result<BoxStream<'static, Result<FromServer>>> {
        self.driver.ready(ctx).await?;
        let mut client = self.driver.topic_client(ctx).await?;
        let streaming = ctx
            .run(async {
                client
                    .stream_write(outbound)
                    .await
                    .map_err(|s| from_grpc_status(&s))
            })
            .await?;
        debug!("topic write stream established");
        Ok(streaming
            .map(|frame| frame.map_err(|s| from_grpc_status(&s)))
            .boxed())
    }
}
