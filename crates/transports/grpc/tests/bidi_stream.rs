//! Integration tests for the bidirectional stream runtime over an
//! in-memory transport: request/response matching, reconnect replay,
//! cancellation and close semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use ydbx_core::{Ctx, Error, Result};
use ydbx_grpc::bidi::{BidiTransport, FrameAction, StreamHooks, StreamSession};

#[derive(Clone, Debug, PartialEq)]
struct Req {
    id: u64,
    body: String,
}

#[derive(Clone, Debug)]
struct Resp {
    id: u64,
    ok: bool,
    body: String,
}

fn req(id: u64, body: &str) -> Req {
    Req {
        id,
        body: body.into(),
    }
}

struct EchoHooks;

impl StreamHooks<Req, Resp> for EchoHooks {
    fn on_frame(&self, frame: &Resp) -> FrameAction<Req> {
        if frame.body == "ping" {
            FrameAction::Reply(req(0, "pong"))
        } else if frame.body == "fatal" {
            FrameAction::Disconnect(Error::transport("server said fatal"))
        } else {
            FrameAction::Continue
        }
    }

    fn request_id(&self, frame: &Resp) -> Option<u64> {
        (frame.id != 0).then_some(frame.id)
    }

    fn check_result(&self, frame: &Resp) -> Result<()> {
        if frame.ok {
            Ok(())
        } else {
            Err(Error::NonRetryableServer {
                status: "BAD_REQUEST".into(),
                message: frame.body.clone(),
            })
        }
    }
}

/// One fake server-side connection: what the client sent, and a handle to
/// push frames back (dropping it ends the connection).
struct FakeConn {
    sent: mpsc::UnboundedReceiver<Req>,
    respond: mpsc::UnboundedSender<Result<Resp>>,
}

impl FakeConn {
    async fn expect(&mut self) -> Req {
        timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("outbound closed")
    }

    fn reply(&self, id: u64, ok: bool, body: &str) {
        self.respond
            .send(Ok(Resp {
                id,
                ok,
                body: body.into(),
            }))
            .unwrap();
    }
}

struct FakeTransport {
    conns: mpsc::UnboundedSender<FakeConn>,
}

impl FakeTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<FakeConn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FakeTransport { conns: tx }, rx)
    }
}

#[async_trait]
impl BidiTransport<Req, Resp> for FakeTransport {
    async fn open(
        &self,
        mut outbound: BoxStream<'static, Req>,
        _ctx: &Ctx,
    ) -> Result<BoxStream<'static, Result<Resp>>> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = outbound.next().await {
                if sent_tx.send(frame).is_err() {
                    break;
                }
            }
        });
        let (respond, responses) = mpsc::unbounded_channel();
        self.conns
            .send(FakeConn {
                sent: sent_rx,
                respond,
            })
            .expect("test dropped the connection receiver");
        Ok(UnboundedReceiverStream::new(responses).boxed())
    }
}

fn session() -> StreamSession<Req, Resp> {
    StreamSession::new(Arc::new(EchoHooks))
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<FakeConn>) -> FakeConn {
    timeout(Duration::from_secs(1), conns.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("transport gone")
}

#[tokio::test]
async fn request_resolves_with_matching_response() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let pending = {
        let session = session.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { session.send_request(1, req(1, "acquire"), &ctx).await })
    };

    assert_eq!(conn.expect().await, req(1, "acquire"));
    conn.reply(1, true, "done");

    let resp = pending.await.unwrap().unwrap();
    assert_eq!(resp.body, "done");
    assert_eq!(session.outstanding_len(), 0);
}

#[tokio::test]
async fn failed_result_rejects_the_request() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let pending = {
        let session = session.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { session.send_request(7, req(7, "create"), &ctx).await })
    };
    conn.expect().await;
    conn.reply(7, false, "no such path");

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.has_server_status("BAD_REQUEST"));
}

#[tokio::test]
async fn ping_frames_get_a_pong_reply() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    session
        .start(&transport, None, &Ctx::background())
        .await
        .unwrap();
    let mut conn = next_conn(&mut conns).await;

    conn.reply(0, true, "ping");
    assert_eq!(conn.expect().await, req(0, "pong"));
}

#[tokio::test]
async fn reconnect_replays_pending_after_initial_request() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session
        .start(&transport, Some(req(0, "hello")), &ctx)
        .await
        .unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert_eq!(conn.expect().await, req(0, "hello"));

    let pending = {
        let session = session.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { session.send_request(3, req(3, "acquire"), &ctx).await })
    };
    conn.expect().await;

    // Server dies before answering.
    drop(conn);
    let err = session.wait_for_disconnect().await;
    assert!(err.is_stream_retryable());
    assert_eq!(session.outstanding_len(), 1);

    // Next connection: fresh initial request first, then the replay.
    session
        .start(&transport, Some(req(0, "hello-again")), &ctx)
        .await
        .unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert_eq!(conn.expect().await, req(0, "hello-again"));
    assert_eq!(conn.expect().await, req(3, "acquire"));
    conn.reply(3, true, "acquired");

    assert_eq!(pending.await.unwrap().unwrap().body, "acquired");
}

#[tokio::test]
async fn replay_preserves_request_id_order_and_unsent_frames() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();

    // Queued before any connection exists.
    session.send(req(0, "early")).unwrap();
    let p1 = {
        let (session, ctx) = (session.clone(), ctx.clone());
        tokio::spawn(async move { session.send_request(10, req(10, "first"), &ctx).await })
    };
    let p2 = {
        let (session, ctx) = (session.clone(), ctx.clone());
        tokio::spawn(async move { session.send_request(11, req(11, "second"), &ctx).await })
    };
    // Let both requests land in the queue before starting.
    tokio::time::sleep(Duration::from_millis(20)).await;

    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    // Outstanding requests replay in id order ahead of untagged backlog,
    // and nothing is duplicated.
    assert_eq!(conn.expect().await, req(10, "first"));
    assert_eq!(conn.expect().await, req(11, "second"));
    assert_eq!(conn.expect().await, req(0, "early"));

    conn.reply(10, true, "ok");
    conn.reply(11, true, "ok");
    p1.await.unwrap().unwrap();
    p2.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancelling_a_request_removes_it_from_the_outstanding_map() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let op_ctx = ctx.with_timeout(Duration::from_millis(50));
    let err = session
        .send_request(5, req(5, "slow"), &op_ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert_eq!(session.outstanding_len(), 0);

    // A late response for the cancelled id is discarded, not crashed on.
    conn.expect().await;
    conn.reply(5, true, "too late");
    conn.reply(0, true, "ping");
    assert_eq!(conn.expect().await, req(0, "pong"));
}

#[tokio::test]
async fn hook_disconnect_preserves_pending() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let pending = {
        let (session, ctx) = (session.clone(), ctx.clone());
        tokio::spawn(async move { session.send_request(9, req(9, "op"), &ctx).await })
    };
    conn.expect().await;
    conn.reply(0, true, "fatal");

    let err = session.wait_for_disconnect().await;
    assert!(err.to_string().contains("server said fatal"));
    assert_eq!(session.outstanding_len(), 1);

    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert_eq!(conn.expect().await, req(9, "op"));
    conn.reply(9, true, "ok");
    pending.await.unwrap().unwrap();
}

#[tokio::test]
async fn local_disconnect_keeps_the_session_usable() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let _conn = next_conn(&mut conns).await;

    session.disconnect();
    let err = session.wait_for_disconnect().await;
    assert!(err.is_stream_retryable());
    assert!(!session.is_closed());

    session.start(&transport, None, &ctx).await.unwrap();
    next_conn(&mut conns).await;
}

#[tokio::test]
async fn close_fails_outstanding_and_rejects_new_work() {
    let (transport, mut conns) = FakeTransport::new();
    let session = session();
    let ctx = Ctx::background();
    session.start(&transport, None, &ctx).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let pending = {
        let (session, ctx) = (session.clone(), ctx.clone());
        tokio::spawn(async move { session.send_request(2, req(2, "op"), &ctx).await })
    };
    conn.expect().await;

    session.close(None);
    assert!(matches!(pending.await.unwrap(), Err(Error::Closed)));
    assert!(matches!(session.send(req(0, "more")), Err(Error::Closed)));
    assert!(session.is_closed());

    // Idempotent.
    session.close(None);
}
