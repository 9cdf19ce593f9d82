//! End-to-end topic writer tests over an in-memory transport: auto-mode
//! renumbering, manual-mode dedup across reconnects, batching caps,
//! graceful and forced shutdown, and error classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use ydbx_core::{Ctx, Error, Result};
use ydbx_grpc::bidi::BidiTransport;
use ydbx_grpc::pb::topic as pb;
use ydbx_grpc::pb::topic::from_client::ClientMessage;
use ydbx_grpc::pb::topic::from_server::ServerMessage;
use ydbx_grpc::pb::topic::write_ack::MessageWriteStatus;
use ydbx_grpc::pb::StatusCode;
use ydbx_topic::{
    AckStatus, GarbageCollectionOptions, TopicMessage, TopicWriter, WriterEvent, WriterOptions,
    WriterState, MAX_PAYLOAD_SIZE,
};

struct FakeConn {
    sent: mpsc::UnboundedReceiver<pb::FromClient>,
    respond: mpsc::UnboundedSender<Result<pb::FromServer>>,
}

impl FakeConn {
    async fn expect(&mut self) -> ClientMessage {
        timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("outbound closed")
            .client_message
            .expect("empty client frame")
    }

    async fn expect_init(&mut self) -> pb::InitRequest {
        match self.expect().await {
            ClientMessage::InitRequest(init) => init,
            other => panic!("expected initRequest, got {other:?}"),
        }
    }

    async fn expect_write(&mut self) -> pb::WriteRequest {
        match self.expect().await {
            ClientMessage::WriteRequest(write) => write,
            other => panic!("expected writeRequest, got {other:?}"),
        }
    }

    fn reply(&self, message: ServerMessage) {
        self.respond
            .send(Ok(pb::FromServer::from_message(message)))
            .unwrap();
    }

    fn reply_init(&self, session_id: &str, last_seq_no: i64) {
        self.reply(ServerMessage::InitResponse(pb::InitResponse {
            session_id: session_id.into(),
            last_seq_no,
            partition_id: 0,
            supported_codecs: vec![1, 2, 4],
        }));
    }

    fn reply_acks(&self, acks: Vec<pb::WriteAck>) {
        self.reply(ServerMessage::WriteResponse(pb::WriteResponse {
            acks,
            partition_id: 0,
        }));
    }

    fn reply_status(&self, status: StatusCode) {
        self.respond
            .send(Ok(pb::FromServer {
                status: status as i32,
                issues: vec![],
                server_message: None,
            }))
            .unwrap();
    }
}

fn written(seq_no: i64, offset: i64) -> pb::WriteAck {
    pb::WriteAck {
        seq_no,
        message_write_status: Some(MessageWriteStatus::Written(pb::Written { offset })),
    }
}

fn skipped(seq_no: i64) -> pb::WriteAck {
    pb::WriteAck {
        seq_no,
        message_write_status: Some(MessageWriteStatus::Skipped(pb::Skipped {
            reason: pb::skipped::Reason::AlreadyWritten as i32,
        })),
    }
}

struct FakeTransport {
    conns: mpsc::UnboundedSender<FakeConn>,
}

impl FakeTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(FakeTransport { conns: tx }), rx)
    }
}

#[async_trait]
impl BidiTransport<pb::FromClient, pb::FromServer> for FakeTransport {
    async fn open(
        &self,
        mut outbound: BoxStream<'static, pb::FromClient>,
        _ctx: &Ctx,
    ) -> Result<BoxStream<'static, Result<pb::FromServer>>> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = outbound.next().await {
                if sent_tx.send(frame).is_err() {
                    break;
                }
            }
        });
        let (respond, responses) = mpsc::unbounded_channel();
        let _ = self.conns.send(FakeConn {
            sent: sent_rx,
            respond,
        });
        Ok(UnboundedReceiverStream::new(responses).boxed())
    }
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<FakeConn>) -> FakeConn {
    timeout(Duration::from_secs(2), conns.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport gone")
}

fn options() -> WriterOptions {
    // A long flush interval keeps the periodic send out of the way; tests
    // force sends through flush/close instead.
    WriterOptions::new("/topic/test", "producer-1").with_flush_interval(Duration::from_secs(30))
}

async fn expect_event(events: &mut tokio::sync::broadcast::Receiver<WriterEvent>) -> WriterEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for writer event")
        .expect("event channel closed")
}

#[tokio::test]
async fn auto_mode_renumbers_on_init() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);
    let mut events = writer.subscribe();

    // Buffered before the handshake: provisional seqNos 1, 2, 3.
    writer.write(TopicMessage::new("A")).unwrap();
    writer.write(TopicMessage::new("B")).unwrap();
    writer.write(TopicMessage::new("C")).unwrap();

    let mut conn = next_conn(&mut conns).await;
    let init = conn.expect_init().await;
    assert_eq!(init.path, "/topic/test");
    assert_eq!(init.producer_id, "producer-1");
    assert!(init.get_last_seq_no);

    conn.reply_init("session-1", 42);

    match expect_event(&mut events).await {
        WriterEvent::Session {
            session_id,
            last_seq_no,
            next_seq_no,
        } => {
            assert_eq!(session_id, "session-1");
            assert_eq!(last_seq_no, 42);
            assert_eq!(next_seq_no, 46);
        }
        other => panic!("expected session event, got {other:?}"),
    }

    // Survivors went out renumbered 43, 44, 45.
    let write = conn.expect_write().await;
    let seq_nos: Vec<i64> = write.messages.iter().map(|m| m.seq_no).collect();
    assert_eq!(seq_nos, vec![43, 44, 45]);

    conn.reply_acks(vec![written(43, 0), written(44, 1), written(45, 2)]);
    let flushed = writer.flush(&Ctx::background()).await.unwrap();
    assert_eq!(flushed, Some(45));

    match expect_event(&mut events).await {
        WriterEvent::Acknowledgments(acks) => {
            assert_eq!(acks.len(), 3);
            assert_eq!(acks[0].seq_no, 43);
            assert!(matches!(acks[2].status, AckStatus::Written { offset: 2 }));
        }
        other => panic!("expected acks event, got {other:?}"),
    }

    // Writes after the realign continue the server numbering.
    writer.write(TopicMessage::new("D")).unwrap();
    assert_eq!(writer.last_seq_no(), 46);
    writer.destroy();
}

#[tokio::test]
async fn manual_mode_resends_and_dedups_across_reconnect() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);
    let mut events = writer.subscribe();

    for seq_no in [10, 11, 12] {
        writer
            .write(TopicMessage::new("payload").with_seq_no(seq_no))
            .unwrap();
    }

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 0);

    let write = conn.expect_write().await;
    let seq_nos: Vec<i64> = write.messages.iter().map(|m| m.seq_no).collect();
    assert_eq!(seq_nos, vec![10, 11, 12]);

    conn.reply_acks(vec![written(10, 0)]);
    match expect_event(&mut events).await {
        WriterEvent::Acknowledgments(acks) => assert_eq!(acks[0].seq_no, 10),
        other => panic!("expected acks event, got {other:?}"),
    }

    // The stream dies before 11 and 12 are acknowledged.
    drop(conn);

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 10);

    // 11 and 12 are resent with their user seqNos untouched.
    let write = conn.expect_write().await;
    let seq_nos: Vec<i64> = write.messages.iter().map(|m| m.seq_no).collect();
    assert_eq!(seq_nos, vec![11, 12]);

    // The server had already persisted 11; it reports skipped.
    conn.reply_acks(vec![skipped(11), written(12, 5)]);
    match expect_event(&mut events).await {
        WriterEvent::Acknowledgments(acks) => {
            assert_eq!(acks.len(), 2);
            assert!(matches!(acks[0].status, AckStatus::Skipped));
            assert!(matches!(acks[1].status, AckStatus::Written { offset: 5 }));
        }
        other => panic!("expected acks event, got {other:?}"),
    }

    let flushed = writer.flush(&Ctx::background()).await.unwrap();
    assert_eq!(flushed, Some(12));
    writer.destroy();
}

#[tokio::test]
async fn batches_respect_the_inflight_cap() {
    let (transport, mut conns) = FakeTransport::new();
    let opts = options()
        .with_max_inflight_count(3)
        .with_garbage_collection(GarbageCollectionOptions {
            max_garbage_count: 2,
            max_garbage_size: usize::MAX,
        });
    let writer = TopicWriter::start(transport, opts, None);

    for _ in 0..8 {
        writer.write(TopicMessage::new(vec![0u8; 10])).unwrap();
    }

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 0);

    let flush = {
        let ctx = Ctx::background();
        let writer = writer;
        tokio::spawn(async move {
            let flushed = writer.flush(&ctx).await;
            (writer, flushed)
        })
    };

    // First batch saturates the in-flight cap.
    let write = conn.expect_write().await;
    assert_eq!(write.messages.len(), 3);
    assert_eq!(write.messages[0].seq_no, 1);

    // Nothing more until acks free slots.
    conn.reply_acks(vec![written(1, 0), written(2, 1), written(3, 2)]);
    let write = conn.expect_write().await;
    assert_eq!(write.messages.len(), 3);
    assert_eq!(write.messages[0].seq_no, 4);

    conn.reply_acks(vec![written(4, 3), written(5, 4), written(6, 5)]);
    let write = conn.expect_write().await;
    assert_eq!(write.messages.len(), 2);

    conn.reply_acks(vec![written(7, 6), written(8, 7)]);
    let (writer, flushed) = flush.await.unwrap();
    assert_eq!(flushed.unwrap(), Some(8));

    // Everything acked and compacted away.
    let stats = writer.stats();
    assert_eq!(stats.buffer_length, 0);
    assert_eq!(stats.inflight_length, 0);
    assert_eq!(stats.garbage_size, 0);
    writer.destroy();
}

#[tokio::test]
async fn payload_size_boundary() {
    let (transport, _conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);

    writer
        .write(TopicMessage::new(vec![0u8; MAX_PAYLOAD_SIZE]))
        .unwrap();

    let err = writer
        .write(TopicMessage::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]))
        .unwrap_err();
    match err {
        Error::PayloadTooLarge { size, max } => {
            assert_eq!(size, MAX_PAYLOAD_SIZE + 1);
            assert_eq!(max, MAX_PAYLOAD_SIZE);
        }
        other => panic!("expected payload error, got {other:?}"),
    }
    writer.destroy();
}

#[tokio::test]
async fn seq_no_mode_is_pinned_by_first_write() {
    let (transport, _conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);

    writer.write(TopicMessage::new("auto")).unwrap();
    let err = writer
        .write(TopicMessage::new("manual").with_seq_no(10))
        .unwrap_err();
    assert!(matches!(err, Error::SeqNoModeConflict));
    writer.destroy();
}

#[tokio::test]
async fn graceful_close_waits_for_drain() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);
    let mut events = writer.subscribe();

    for _ in 0..5 {
        writer.write(TopicMessage::new("payload")).unwrap();
    }

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 0);

    let close = {
        let writer = writer;
        tokio::spawn(async move {
            let result = writer.close(&Ctx::background()).await;
            (writer, result)
        })
    };

    // Close drains: the outstanding batch still goes out and is acked.
    let write = conn.expect_write().await;
    assert_eq!(write.messages.len(), 5);
    conn.reply_acks((1..=5).map(|s| written(s, s - 1)).collect());

    let (writer, result) = close.await.unwrap();
    result.unwrap();
    assert_eq!(writer.state(), WriterState::Closed);

    // Writes after close are rejected; close is idempotent.
    assert!(matches!(
        writer.write(TopicMessage::new("late")),
        Err(Error::Closed)
    ));
    writer.close(&Ctx::background()).await.unwrap();

    // The acks event arrived before the terminal Closed event.
    let mut saw_acks = false;
    loop {
        match expect_event(&mut events).await {
            WriterEvent::Acknowledgments(_) => saw_acks = true,
            WriterEvent::Closed => break,
            WriterEvent::Session { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_acks);
}

#[tokio::test]
async fn forced_shutdown_when_acks_stop() {
    let (transport, mut conns) = FakeTransport::new();
    let opts = options().with_graceful_shutdown_timeout(Duration::from_millis(100));
    let writer = TopicWriter::start(transport, opts, None);
    let mut events = writer.subscribe();

    writer.write(TopicMessage::new("payload")).unwrap();

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 0);
    // The batch goes out but the server never acknowledges it.
    conn.expect_write().await;

    writer.close(&Ctx::background()).await.unwrap();
    assert_eq!(writer.state(), WriterState::Closed);

    let mut saw_forced_error = false;
    loop {
        match expect_event(&mut events).await {
            WriterEvent::Error(message) => {
                assert!(message.contains("graceful shutdown timed out"));
                saw_forced_error = true;
            }
            WriterEvent::Closed => break,
            WriterEvent::Session { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_forced_error);
}

#[tokio::test]
async fn flush_is_idempotent_on_an_empty_window() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 7);
    writer.ready(&Ctx::background()).await.unwrap();

    // Nothing buffered or in flight: flush resolves immediately with the
    // last seqNo the server confirmed, over and over.
    assert_eq!(writer.flush(&Ctx::background()).await.unwrap(), Some(7));
    assert_eq!(writer.flush(&Ctx::background()).await.unwrap(), Some(7));
    writer.destroy();
}

#[tokio::test]
async fn retryable_stream_status_reconnects() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);
    let mut events = writer.subscribe();

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-1", 0);
    match expect_event(&mut events).await {
        WriterEvent::Session { session_id, .. } => assert_eq!(session_id, "session-1"),
        other => panic!("expected session event, got {other:?}"),
    }

    // An OVERLOADED envelope ends the connection but not the writer.
    conn.reply_status(StatusCode::Overloaded);

    let mut conn = next_conn(&mut conns).await;
    conn.expect_init().await;
    conn.reply_init("session-2", 0);
    match expect_event(&mut events).await {
        WriterEvent::Session { session_id, .. } => assert_eq!(session_id, "session-2"),
        other => panic!("expected session event, got {other:?}"),
    }
    assert_eq!(writer.session_id(), "session-2");
    writer.destroy();
}

#[tokio::test]
async fn non_retryable_stream_status_closes_with_error() {
    let (transport, mut conns) = FakeTransport::new();
    let writer = TopicWriter::start(transport, options(), None);
    let mut events = writer.subscribe();

    let conn = next_conn(&mut conns).await;
    conn.reply_status(StatusCode::SchemeError);

    let mut saw_error = false;
    loop {
        match expect_event(&mut events).await {
            WriterEvent::Error(message) => {
                assert!(message.contains("SCHEME_ERROR"));
                saw_error = true;
            }
            WriterEvent::Closed => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_error);

    let err = writer.write(TopicMessage::new("payload")).unwrap_err();
    assert!(err.has_server_status("SCHEME_ERROR"));
}
