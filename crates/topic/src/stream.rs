//! Write-stream actor: frame translation and token refresh.
//!
//! The stream side of the writer is deliberately thin. Hooks translate
//! server frames into [`StreamEvent`]s for the writer's state machine —
//! error classification and window bookkeeping stay over there — and a
//! periodic task pushes refreshed auth tokens onto the live stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use ydbx_core::Ctx;
use ydbx_grpc::bidi::{FrameAction, StreamHooks, StreamSession};
use ydbx_grpc::credentials::Credentials;
use ydbx_grpc::pb::topic as pb;
use ydbx_grpc::pb::topic::from_client::ClientMessage;
use ydbx_grpc::pb::topic::from_server::ServerMessage;
use ydbx_grpc::status::check_server_status;

/// Server frames, decoded for the writer's state machine.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Init {
        session_id: String,
        last_seq_no: i64,
        partition_id: i64,
    },
    Acks(Vec<pb::WriteAck>),
}

pub(crate) struct WriterStreamHooks {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl WriterStreamHooks {
    pub(crate) fn new(events: mpsc::UnboundedSender<StreamEvent>) -> Self {
        WriterStreamHooks { events }
    }
}

impl StreamHooks<pb::FromClient, pb::FromServer> for WriterStreamHooks {
    fn on_frame(&self, frame: &pb::FromServer) -> FrameAction<pb::FromClient> {
        // The envelope status covers the stream as a whole; a failure ends
        // the connection and the writer decides whether to reconnect.
        if frame.status != 0 {
            if let Err(err) = check_server_status(frame.status, &frame.issues) {
                return FrameAction::Disconnect(err);
            }
        }
        match frame.server_message.as_ref() {
            Some(ServerMessage::InitResponse(init)) => {
                let _ = self.events.send(StreamEvent::Init {
                    session_id: init.session_id.clone(),
                    last_seq_no: init.last_seq_no,
                    partition_id: init.partition_id,
                });
            }
            Some(ServerMessage::WriteResponse(write)) => {
                let _ = self.events.send(StreamEvent::Acks(write.acks.clone()));
            }
            Some(ServerMessage::UpdateTokenResponse(_)) => {
                debug!("auth token accepted");
            }
            None => warn!("write stream frame without a payload"),
        }
        FrameAction::Continue
    }

    // The write stream has no tagged requests; everything flows through
    // `on_frame`.
    fn request_id(&self, _frame: &pb::FromServer) -> Option<u64> {
        None
    }

    fn check_result(&self, _frame: &pb::FromServer) -> ydbx_core::Result<()> {
        Ok(())
    }
}

/// Periodically fetch a fresh token and push it onto the stream. Runs for
/// the writer's lifetime; send failures just mean the stream is between
/// connections.
pub(crate) async fn run_token_refresher(
    stream: StreamSession<pb::FromClient, pb::FromServer>,
    credentials: Arc<dyn Credentials>,
    interval: Duration,
    ctx: Ctx,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the stream already carries a fresh
    // token from connect.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ctx.done() => return,
            _ = ticker.tick() => {}
        }
        match credentials.get_token(true, &ctx).await {
            Ok(token) => {
                debug!("pushing refreshed auth token");
                let _ = stream.send(pb::FromClient::from_message(
                    ClientMessage::UpdateTokenRequest(pb::UpdateTokenRequest { token }),
                ));
            }
            Err(err) => warn!(error = %err, "token refresh failed"),
        }
    }
}
