//! The topic writer state machine.
//!
//! A writer is a handle plus one actor task. The handle performs
//! validation, seqNo assignment and compression synchronously into the
//! sliding-window store; the actor owns the connection lifecycle: it opens
//! the write stream, reconciles the window against every init response,
//! slices batches under the size and in-flight caps, applies
//! acknowledgments, and drives graceful shutdown. Transient stream errors
//! reconnect with backoff; the server deduplicates resent messages by
//! `(producer_id, seqNo)` and acks them as skipped.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ydbx_core::{retry, Ctx, CodecRegistry, Error, Result, RetryConfig};
use ydbx_grpc::bidi::{BidiTransport, StreamSession};
use ydbx_grpc::credentials::Credentials;
use ydbx_grpc::driver::{Driver, TopicWriteGrpcTransport};
use ydbx_grpc::pb::topic as pb;
use ydbx_grpc::pb::topic::from_client::ClientMessage;
use ydbx_grpc::pb::topic::write_ack::MessageWriteStatus;

use crate::options::{Partitioning, TopicMessage, WriterOptions, MAX_PAYLOAD_SIZE};
use crate::seqno::{SeqNoManager, SeqNoMode};
use crate::store::{MessageStore, StoreCounters, StoredMessage};
use crate::stream::{run_token_refresher, StreamEvent, WriterStreamHooks};

/// How the server disposed of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Persisted at the given partition offset.
    Written { offset: i64 },
    /// Deduplicated: this seqNo was already persisted.
    Skipped,
    /// Persisted inside the writer's transaction.
    WrittenInTx,
}

/// Acknowledgment for one seqNo.
#[derive(Debug, Clone)]
pub struct MessageAck {
    pub seq_no: i64,
    pub status: AckStatus,
}

/// Events a writer broadcasts. At-least-once around reconnects.
#[derive(Debug, Clone)]
pub enum WriterEvent {
    /// A batch of acknowledgments, in seqNo order.
    Acknowledgments(Vec<MessageAck>),
    /// Init reconciliation finished (auto mode): external seqNo tracking
    /// can realign.
    Session {
        session_id: String,
        last_seq_no: i64,
        next_seq_no: i64,
    },
    /// The writer hit a non-retryable error and is closing.
    Error(String),
    /// Terminal: no further events follow.
    Closed,
}

/// Public lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Connecting,
    Ready,
    Closing,
    Closed,
}

struct WriterCore {
    store: MessageStore,
    seqno: SeqNoManager,
    registry: CodecRegistry,
    /// Init response received on the current connection.
    initialized: bool,
    /// Init response received at least once in this writer's lifetime.
    ever_initialized: bool,
    session_id: String,
    /// Highest acknowledged seqNo.
    last_acked: i64,
    flush_waiters: Vec<oneshot::Sender<Result<Option<i64>>>>,
    close_requested: bool,
    error: Option<Error>,
}

struct WriterInner {
    options: WriterOptions,
    core: Mutex<WriterCore>,
    stream: StreamSession<pb::FromClient, pb::FromServer>,
    /// Nudges the actor: new writes, flush/close requests, freed slots.
    wakeup: Notify,
    state: Arc<watch::Sender<WriterState>>,
    events: broadcast::Sender<WriterEvent>,
    /// Writer lifetime; cancelled on destroy/terminal close.
    ctx: Ctx,
}

impl WriterInner {
    fn emit(&self, event: WriterEvent) {
        let _ = self.events.send(event);
    }
}

/// Client-side handle for the topic service.
pub struct TopicClient {
    driver: Arc<Driver>,
}

impl TopicClient {
    pub fn new(driver: Arc<Driver>) -> Self {
        TopicClient { driver }
    }

    /// Create a writer on this client's driver, with periodic token
    /// refresh wired to the driver's credentials.
    pub fn writer(&self, options: WriterOptions) -> TopicWriter {
        let transport = Arc::new(TopicWriteGrpcTransport::new(self.driver.clone()));
        let credentials: Arc<dyn Credentials> = Arc::new(DriverTokenSource {
            driver: self.driver.clone(),
        });
        TopicWriter::start(transport, options, Some(credentials))
    }
}

/// Token source that refreshes through the driver, keeping the driver's
/// interceptor slot warm as a side effect.
struct DriverTokenSource {
    driver: Arc<Driver>,
}

#[async_trait::async_trait]
impl Credentials for DriverTokenSource {
    async fn get_token(&self, force: bool, ctx: &Ctx) -> Result<String> {
        self.driver.refresh_token(force, ctx).await
    }
}

/// A buffered, batching, reconnecting topic producer.
///
/// Create via [`TopicClient::writer`] or, with an explicit transport,
/// [`TopicWriter::start`]. Always [`close`](TopicWriter::close) (or
/// [`destroy`](TopicWriter::destroy)) when done; dropping the handle
/// destroys the writer, discarding unacknowledged messages.
pub struct TopicWriter {
    inner: Arc<WriterInner>,
}

impl TopicWriter {
    /// Start a writer over an explicit transport. `credentials`, when
    /// given, feeds the periodic update-token requests.
    pub fn start(
        transport: Arc<dyn BidiTransport<pb::FromClient, pb::FromServer>>,
        options: WriterOptions,
        credentials: Option<Arc<dyn Credentials>>,
    ) -> TopicWriter {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stream = StreamSession::new(Arc::new(WriterStreamHooks::new(events_tx)));
        let inner = Arc::new(WriterInner {
            core: Mutex::new(WriterCore {
                store: MessageStore::new(options.garbage_collection.clone()),
                seqno: SeqNoManager::default(),
                registry: CodecRegistry::default(),
                initialized: false,
                ever_initialized: false,
                session_id: String::new(),
                last_acked: 0,
                flush_waiters: Vec::new(),
                close_requested: false,
                error: None,
            }),
            stream: stream.clone(),
            wakeup: Notify::new(),
            state: Arc::new(watch::channel(WriterState::Connecting).0),
            events: broadcast::channel(256).0,
            ctx: Ctx::background(),
            options,
        });
        if let Some(credentials) = credentials {
            tokio::spawn(run_token_refresher(
                stream,
                credentials,
                inner.options.update_token_interval,
                inner.ctx.clone(),
            ));
        }
        tokio::spawn(run_writer(inner.clone(), transport, events_rx));
        TopicWriter { inner }
    }

    /// Enqueue one message. Validates the payload size, assigns a seqNo
    /// (pinning the mode on first use), compresses per the configured
    /// codec, and appends to the buffer. Never blocks on I/O.
    pub fn write(&self, message: TopicMessage) -> Result<()> {
        let mut core = self.inner.core.lock();
        if let Some(err) = &core.error {
            return Err(err.clone());
        }
        if core.close_requested {
            return Err(Error::Closed);
        }
        let size = message.data.len();
        if size > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let seq_no = core.seqno.assign(message.seq_no)?;
        let (data, effective_codec) = core.registry.encode(self.inner.options.codec, &message.data)?;
        core.store.push(StoredMessage {
            seq_no,
            created_at: message.created_at.unwrap_or_else(SystemTime::now),
            data,
            codec: effective_codec,
            uncompressed_size: size,
            metadata: message.metadata,
        });
        drop(core);
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Resolve once buffer and in-flight are both empty, with the highest
    /// acknowledged seqNo (`None` if nothing was ever acknowledged).
    /// Idempotent when the window is already empty.
    pub async fn flush(&self, ctx: &Ctx) -> Result<Option<i64>> {
        let rx = {
            let mut core = self.inner.core.lock();
            if let Some(err) = &core.error {
                return Err(err.clone());
            }
            if core.store.is_drained() {
                return Ok((core.last_acked > 0).then_some(core.last_acked));
            }
            let (tx, rx) = oneshot::channel();
            core.flush_waiters.push(tx);
            rx
        };
        self.inner.wakeup.notify_one();
        ctx.run(async { rx.await.unwrap_or(Err(Error::Closed)) }).await
    }

    /// Resolve once the first init handshake completes (or fail with the
    /// writer's terminal error).
    pub async fn ready(&self, ctx: &Ctx) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        ctx.run(async {
            loop {
                match *rx.borrow_and_update() {
                    WriterState::Ready => return Ok(()),
                    WriterState::Closed => return Err(self.terminal_error()),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(Error::Closed);
                }
            }
        })
        .await
    }

    /// Graceful shutdown: keep sending until buffer and in-flight drain,
    /// then close. If acknowledgments stop arriving, the
    /// `graceful_shutdown_timeout` forces the close with an error event.
    /// Idempotent; a second call returns immediately once closed.
    pub async fn close(&self, ctx: &Ctx) -> Result<()> {
        {
            let mut core = self.inner.core.lock();
            if *self.inner.state.borrow() == WriterState::Closed {
                return Ok(());
            }
            core.close_requested = true;
        }
        self.inner.wakeup.notify_one();
        let mut rx = self.inner.state.subscribe();
        ctx.run(async {
            loop {
                if *rx.borrow_and_update() == WriterState::Closed {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Ok(());
                }
            }
        })
        .await
    }

    /// Immediate teardown: reject every pending future and close the
    /// stream. Unacknowledged messages are lost.
    pub fn destroy(&self) {
        let waiters = {
            let mut core = self.inner.core.lock();
            core.close_requested = true;
            core.error.get_or_insert(Error::Closed);
            std::mem::take(&mut core.flush_waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(Error::Closed));
        }
        self.inner.ctx.cancel();
        self.inner.stream.close(None);
        if self.inner.state.send_replace(WriterState::Closed) != WriterState::Closed {
            self.inner.emit(WriterEvent::Closed);
        }
        self.inner.wakeup.notify_one();
    }

    /// Subscribe to [`WriterEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<WriterEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> WriterState {
        *self.inner.state.borrow()
    }

    /// Window counters, primarily for diagnostics.
    pub fn stats(&self) -> StoreCounters {
        self.inner.core.lock().store.counters()
    }

    /// Server-assigned write session id; empty until the first init.
    pub fn session_id(&self) -> String {
        self.inner.core.lock().session_id.clone()
    }

    /// Last seqNo assigned to a written message.
    pub fn last_seq_no(&self) -> i64 {
        self.inner.core.lock().seqno.last_seq_no()
    }

    fn terminal_error(&self) -> Error {
        self.inner.core.lock().error.clone().unwrap_or(Error::Closed)
    }
}

impl Drop for TopicWriter {
    fn drop(&mut self) {
        if *self.inner.state.borrow() != WriterState::Closed {
            self.destroy();
        }
    }
}

async fn run_writer(
    inner: Arc<WriterInner>,
    transport: Arc<dyn BidiTransport<pb::FromClient, pb::FromServer>>,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
) {
    // The receiver survives reconnects; each connection attempt borrows it
    // for its own lifetime.
    let events_rx = tokio::sync::Mutex::new(events_rx);
    let config = RetryConfig::unbounded_stream();
    let result: Result<()> = retry(&config, &inner.ctx, |attempt| {
        let inner = inner.clone();
        let transport = transport.clone();
        let events_rx = &events_rx;
        async move { run_connection(&inner, attempt, transport.as_ref(), events_rx).await }
    })
    .await;

    finish(&inner, result.err().unwrap_or(Error::Closed));
}

fn finish(inner: &Arc<WriterInner>, err: Error) {
    let graceful = matches!(err, Error::Closed | Error::Cancelled);
    if *inner.state.borrow() == WriterState::Closed {
        // destroy() already tore everything down.
        inner.stream.close(Some(err));
        return;
    }

    let (waiters, drained, last_acked) = {
        let mut core = inner.core.lock();
        if graceful {
            core.error.get_or_insert(Error::Closed);
        } else {
            core.error = Some(err.clone());
        }
        (
            std::mem::take(&mut core.flush_waiters),
            core.store.is_drained(),
            core.last_acked,
        )
    };
    for waiter in waiters {
        let _ = waiter.send(if graceful && drained {
            Ok((last_acked > 0).then_some(last_acked))
        } else {
            Err(err.clone())
        });
    }
    if !graceful {
        warn!(error = %err, "topic writer terminated");
        inner.emit(WriterEvent::Error(err.to_string()));
    } else {
        info!("topic writer closed");
    }
    inner.stream.close(Some(err));
    inner.state.send_replace(WriterState::Closed);
    inner.emit(WriterEvent::Closed);
    inner.ctx.cancel();
}

/// One connection attempt: handshake, then the send/ack loop until
/// disconnect or terminal close. Always returns `Err` so the retry loop
/// classifies the outcome.
async fn run_connection(
    inner: &Arc<WriterInner>,
    attempt: u32,
    transport: &dyn BidiTransport<pb::FromClient, pb::FromServer>,
    events_rx: &tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamEvent>>,
) -> Result<()> {
    inner.ctx.check()?;
    {
        let mut core = inner.core.lock();
        if let Some(err) = &core.error {
            return Err(err.clone());
        }
        if core.close_requested && core.store.is_drained() {
            return Err(Error::Closed);
        }
        core.initialized = false;
    }
    inner.state.send_replace(WriterState::Connecting);

    let mut events = events_rx.lock().await;
    // Leftovers from the previous connection are stale.
    while events.try_recv().is_ok() {}

    debug!(attempt, topic = %inner.options.topic, "opening write stream");
    inner
        .stream
        .start(transport, Some(build_init_request(&inner.options)), &inner.ctx)
        .await?;

    let (session_id, last_seq_no) = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Init { session_id, last_seq_no, partition_id }) => {
                    debug!(partition_id, "write stream initialized");
                    break (session_id, last_seq_no);
                }
                Some(StreamEvent::Acks(_)) => continue,
                None => return Err(Error::Closed),
            },
            err = inner.stream.wait_for_disconnect() => return Err(err),
        }
    };
    handle_init(inner, session_id, last_seq_no);
    inner.state.send_replace(WriterState::Ready);

    let mut flush_ticker = tokio::time::interval(inner.options.flush_interval);
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    flush_ticker.tick().await; // consume the immediate first tick

    let mut shutdown_deadline: Option<Instant> = None;
    // Drain anything buffered before the handshake right away.
    let mut force_send = true;

    loop {
        {
            let core = inner.core.lock();
            if let Some(err) = &core.error {
                return Err(err.clone());
            }
            if core.close_requested {
                if core.store.is_drained() {
                    return Err(Error::Closed);
                }
                if shutdown_deadline.is_none() {
                    shutdown_deadline =
                        Some(Instant::now() + inner.options.graceful_shutdown_timeout);
                    drop(core);
                    inner.state.send_replace(WriterState::Closing);
                }
            }
        }
        send_batches(inner, force_send)?;
        force_send = false;

        let forced_shutdown = async {
            match shutdown_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = inner.wakeup.notified() => {}
            _ = flush_ticker.tick() => force_send = true,
            _ = forced_shutdown => {
                warn!("graceful shutdown timed out with unacknowledged messages");
                inner.emit(WriterEvent::Error(
                    "graceful shutdown timed out before all messages were acknowledged".into(),
                ));
                return Err(Error::Closed);
            }
            event = events.recv() => match event {
                Some(StreamEvent::Acks(acks)) => handle_acks(inner, acks),
                Some(StreamEvent::Init { .. }) => {
                    warn!("unexpected init response mid-connection");
                }
                None => return Err(Error::Closed),
            },
            err = inner.stream.wait_for_disconnect() => return Err(err),
        }
    }
}

fn build_init_request(options: &WriterOptions) -> pb::FromClient {
    let partitioning = options.partitioning.as_ref().map(|p| match p {
        Partitioning::PartitionId(id) => pb::init_request::Partitioning::PartitionId(*id),
        Partitioning::MessageGroupId(group) => {
            pb::init_request::Partitioning::MessageGroupId(group.clone())
        }
    });
    pb::FromClient::from_message(ClientMessage::InitRequest(pb::InitRequest {
        path: options.topic.clone(),
        producer_id: options.producer_id.clone(),
        get_last_seq_no: true,
        partitioning,
    }))
}

fn build_write_request(options: &WriterOptions, batch: Vec<StoredMessage>) -> pb::FromClient {
    let codec = batch[0].codec;
    let messages = batch
        .into_iter()
        .map(|message| pb::MessageData {
            seq_no: message.seq_no,
            created_at: Some(prost_types::Timestamp::from(message.created_at)),
            data: message.data,
            uncompressed_size: message.uncompressed_size as i64,
            metadata_items: message
                .metadata
                .into_iter()
                .map(|(key, value)| pb::MetadataItem { key, value })
                .collect(),
        })
        .collect();
    pb::FromClient::from_message(ClientMessage::WriteRequest(pb::WriteRequest {
        messages,
        codec: codec.id() as i32,
        tx: options.tx.as_ref().map(|tx| pb::TransactionIdentity {
            id: tx.id.clone(),
            session_id: tx.session_id.clone(),
        }),
    }))
}

/// Reconcile the window against an init response and realign seqNo state.
fn handle_init(inner: &Arc<WriterInner>, session_id: String, last_seq_no: i64) {
    let session_event = {
        let mut core = inner.core.lock();
        let mode = core.seqno.mode();
        let first_init = !core.ever_initialized;
        let outcome = core.store.reconcile(last_seq_no, mode, first_init);
        if mode != Some(SeqNoMode::Manual) {
            core.seqno.set_last_seq_no(outcome.last_assigned);
        }
        core.session_id = session_id.clone();
        core.last_acked = core.last_acked.max(last_seq_no);
        core.initialized = true;
        core.ever_initialized = true;
        info!(
            session_id = %session_id,
            last_seq_no,
            acknowledged = outcome.acknowledged,
            survivors = outcome.survivors,
            "write session reconciled"
        );
        (mode != Some(SeqNoMode::Manual)).then(|| WriterEvent::Session {
            session_id,
            last_seq_no,
            next_seq_no: core.seqno.next_seq_no(),
        })
    };
    if let Some(event) = session_event {
        inner.emit(event);
    }
    // Dedup alone may have drained the window.
    resolve_flush_if_drained(inner);
}

/// Send as many batches as the caps allow. Without `force`, sending only
/// starts once the buffer is full (back-pressure by structure); flush and
/// close requests always force.
fn send_batches(inner: &Arc<WriterInner>, force: bool) -> Result<()> {
    loop {
        let frame = {
            let mut core = inner.core.lock();
            if !core.initialized || core.store.buffer_len() == 0 {
                return Ok(());
            }
            let eager = force
                || core.close_requested
                || !core.flush_waiters.is_empty()
                || core.store.buffer_size() >= inner.options.max_buffer_bytes;
            if !eager {
                return Ok(());
            }
            let available = inner
                .options
                .max_inflight_count
                .saturating_sub(core.store.inflight_len());
            let batch = core.store.next_batch(available);
            if batch.is_empty() {
                return Ok(());
            }
            debug!(
                count = batch.len(),
                first_seq_no = batch[0].seq_no,
                "sending batch"
            );
            build_write_request(&inner.options, batch)
        };
        inner.stream.send(frame)?;
    }
}

fn handle_acks(inner: &Arc<WriterInner>, acks: Vec<pb::WriteAck>) {
    let confirmed = {
        let mut core = inner.core.lock();
        let mut confirmed = Vec::with_capacity(acks.len());
        for ack in acks {
            let status = match ack.message_write_status {
                Some(MessageWriteStatus::Written(written)) => AckStatus::Written {
                    offset: written.offset,
                },
                Some(MessageWriteStatus::Skipped(_)) => AckStatus::Skipped,
                Some(MessageWriteStatus::WrittenInTx(_)) => AckStatus::WrittenInTx,
                None => {
                    warn!(seq_no = ack.seq_no, "ack without a write status");
                    continue;
                }
            };
            if core.store.ack(ack.seq_no) {
                core.last_acked = core.last_acked.max(ack.seq_no);
                confirmed.push(MessageAck {
                    seq_no: ack.seq_no,
                    status,
                });
            } else {
                debug!(seq_no = ack.seq_no, "stale ack ignored");
            }
        }
        core.store.collect_garbage();
        confirmed
    };
    if !confirmed.is_empty() {
        inner.emit(WriterEvent::Acknowledgments(confirmed));
    }
    resolve_flush_if_drained(inner);
    // Freed in-flight slots may unblock buffered sends.
    inner.wakeup.notify_one();
}

fn resolve_flush_if_drained(inner: &Arc<WriterInner>) {
    let (waiters, last_acked) = {
        let mut core = inner.core.lock();
        if !core.store.is_drained() {
            return;
        }
        (std::mem::take(&mut core.flush_waiters), core.last_acked)
    };
    let last = (last_acked > 0).then_some(last_acked);
    for waiter in waiters {
        let _ = waiter.send(Ok(last));
    }
}
