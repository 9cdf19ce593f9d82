//! Bidirectional stream runtime
//!
//! [`StreamSession`] presents a request/response API over one gRPC
//! bidirectional stream and survives reconnects. Requests are queued FIFO;
//! tagged requests additionally register in an outstanding map keyed by
//! request id and resolve when a response carrying that id arrives. When a
//! connection dies, queued-but-unsent frames and every outstanding request
//! are carried over to the next [`StreamSession::start`] call.
//!
//! The session itself never decides to reconnect: it reports the error that
//! ended the connection through [`StreamSession::wait_for_disconnect`] and
//! the owning session/writer drives the retry loop.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ydbx_core::{Ctx, Error, Result, TransportKind};

/// What the host wants done with one inbound frame, beyond request
/// matching.
pub enum FrameAction<R> {
    /// Nothing; carry on reading.
    Continue,
    /// Enqueue a frame on the same stream (e.g. pong for a ping).
    Reply(R),
    /// End this connection with the given error. Outstanding requests are
    /// preserved for replay.
    Disconnect(Error),
}

/// Host-side frame handling for a [`StreamSession`].
///
/// `on_frame` runs for every frame before request matching and is where
/// side effects live (event emission, session bookkeeping). The dispatcher
/// must be total: unknown frames should be logged and ignored, never an
/// error.
pub trait StreamHooks<R, S>: Send + Sync + 'static {
    /// Side effects for one frame.
    fn on_frame(&self, frame: &S) -> FrameAction<R>;
    /// The request id this frame resolves, if any.
    fn request_id(&self, frame: &S) -> Option<u64>;
    /// Whether a tagged result frame is a success or a failure.
    fn check_result(&self, frame: &S) -> Result<()>;
}

/// Opens the underlying transport stream for a connection attempt.
#[async_trait]
pub trait BidiTransport<R, S>: Send + Sync + 'static {
    /// Open a fresh stream. `outbound` must be polled for client frames
    /// until it ends; the returned stream yields server frames until the
    /// connection dies.
    async fn open(
        &self,
        outbound: BoxStream<'static, R>,
        ctx: &Ctx,
    ) -> Result<BoxStream<'static, Result<S>>>;
}

struct PendingRequest<R, S> {
    request: R,
    tx: oneshot::Sender<Result<S>>,
}

struct SessionState<R, S> {
    /// FIFO of frames not yet handed to the transport. Tagged entries
    /// remember their request id so replay can deduplicate them.
    queue: VecDeque<(Option<u64>, R)>,
    /// Requests awaiting a response, keyed (and replayed) by request id.
    outstanding: BTreeMap<u64, PendingRequest<R, S>>,
    /// Waker of the outbound stream currently starved for frames.
    waker: Option<Waker>,
    /// Bumped on every `start`; outbound streams from older connections
    /// observe the mismatch and end.
    epoch: u64,
    /// Cancels the current connection's response loop.
    conn: Option<CancellationToken>,
    /// Error that ended the most recent connection.
    last_error: Option<Error>,
    /// Set once the session is closed; terminal for every operation.
    terminal: Option<Error>,
}

/// A reconnectable request/response multiplexer over one bidi stream.
pub struct StreamSession<R, S> {
    state: Arc<Mutex<SessionState<R, S>>>,
    hooks: Arc<dyn StreamHooks<R, S>>,
    /// Epoch of the most recently *ended* connection.
    ended: Arc<watch::Sender<u64>>,
}

impl<R, S> Clone for StreamSession<R, S> {
    fn clone(&self) -> Self {
        StreamSession {
            state: self.state.clone(),
            hooks: self.hooks.clone(),
            ended: self.ended.clone(),
        }
    }
}

impl<R, S> StreamSession<R, S>
where
    R: Clone + Send + 'static,
    S: Send + 'static,
{
    /// Create a session with the given frame hooks. No connection exists
    /// until [`StreamSession::start`].
    pub fn new(hooks: Arc<dyn StreamHooks<R, S>>) -> Self {
        let (ended, _) = watch::channel(0);
        StreamSession {
            state: Arc::new(Mutex::new(SessionState {
                queue: VecDeque::new(),
                outstanding: BTreeMap::new(),
                waker: None,
                epoch: 0,
                conn: None,
                last_error: None,
                terminal: None,
            })),
            hooks,
            ended: Arc::new(ended),
        }
    }

    /// Enqueue a fire-and-forget frame. Never blocks on I/O; fails only if
    /// the session is closed.
    pub fn send(&self, request: R) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(terminal) = &state.terminal {
            return Err(terminal.clone());
        }
        state.queue.push_back((None, request));
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        Ok(())
    }

    /// Enqueue a tagged request and await its response.
    ///
    /// Resolves with the first frame whose extracted request id matches;
    /// rejects if the frame's result indicates failure, if `ctx` fires, or
    /// if the session closes. Cancellation removes the outstanding entry
    /// but cannot un-send a frame already on the wire — a later response
    /// for it is discarded.
    pub async fn send_request(&self, req_id: u64, request: R, ctx: &Ctx) -> Result<S> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(terminal) = &state.terminal {
                return Err(terminal.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.outstanding.insert(
                req_id,
                PendingRequest {
                    request: request.clone(),
                    tx,
                },
            );
            state.queue.push_back((Some(req_id), request));
            if let Some(waker) = state.waker.take() {
                waker.wake();
            }
            rx
        };

        tokio::select! {
            result = rx => match result {
                Ok(result) => result,
                // Sender dropped without a response: session closed.
                Err(_) => Err(self.terminal_error()),
            },
            _ = ctx.done() => {
                self.state.lock().outstanding.remove(&req_id);
                Err(ctx.err())
            }
        }
    }

    /// (Re)open the underlying stream and launch the response loop.
    ///
    /// `initial` is transmitted before anything else; outstanding requests
    /// from the previous connection are replayed next, in request-id order,
    /// ahead of frames that were queued but never sent.
    pub async fn start(
        &self,
        transport: &dyn BidiTransport<R, S>,
        initial: Option<R>,
        ctx: &Ctx,
    ) -> Result<()> {
        let (epoch, conn, outbound) = {
            let mut state = self.state.lock();
            if let Some(terminal) = &state.terminal {
                return Err(terminal.clone());
            }
            if let Some(previous) = state.conn.take() {
                previous.cancel();
            }
            state.epoch += 1;
            let epoch = state.epoch;

            let SessionState {
                queue, outstanding, ..
            } = &mut *state;
            let mut rebuilt: VecDeque<(Option<u64>, R)> = VecDeque::new();
            if let Some(initial) = initial {
                rebuilt.push_back((None, initial));
            }
            for (req_id, pending) in outstanding.iter() {
                rebuilt.push_back((Some(*req_id), pending.request.clone()));
            }
            // Entries that never left the queue and are also outstanding
            // were just re-added above; keep only the rest.
            rebuilt.extend(
                queue
                    .drain(..)
                    .filter(|(id, _)| id.map_or(true, |id| !outstanding.contains_key(&id))),
            );
            *queue = rebuilt;

            let conn = CancellationToken::new();
            state.conn = Some(conn.clone());
            state.waker = None;
            (
                epoch,
                conn,
                OutboundQueue {
                    state: self.state.clone(),
                    epoch,
                },
            )
        };

        debug!(epoch, "opening stream");
        let inbound = match transport.open(outbound.boxed(), ctx).await {
            Ok(inbound) => inbound,
            Err(err) => {
                let mut state = self.state.lock();
                if state.epoch == epoch {
                    state.conn = None;
                    state.last_error = Some(err.clone());
                }
                return Err(err);
            }
        };

        let session = self.clone();
        tokio::spawn(async move {
            session.response_loop(inbound, conn, epoch).await;
        });
        Ok(())
    }

    /// Resolves with the error that ended the current connection. Must be
    /// called after a successful [`StreamSession::start`].
    pub async fn wait_for_disconnect(&self) -> Error {
        let epoch = {
            let state = self.state.lock();
            if let Some(terminal) = &state.terminal {
                return terminal.clone();
            }
            state.epoch
        };
        let mut rx = self.ended.subscribe();
        loop {
            if *rx.borrow_and_update() >= epoch {
                let state = self.state.lock();
                return state
                    .last_error
                    .clone()
                    .or_else(|| state.terminal.clone())
                    .unwrap_or_else(|| Error::transport("stream ended"));
            }
            if rx.changed().await.is_err() {
                return self.terminal_error();
            }
        }
    }

    /// Force the current connection to end without closing the session.
    /// Pending requests are preserved and replayed on the next `start`.
    pub fn disconnect(&self) {
        let state = self.state.lock();
        if let Some(conn) = &state.conn {
            conn.cancel();
        }
    }

    /// Terminate the session: end the connection, drop queued frames, and
    /// fail every outstanding request with `err` (default
    /// [`Error::Closed`]). Idempotent.
    pub fn close(&self, err: Option<Error>) {
        let (terminal, outstanding, epoch) = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            let terminal = err.unwrap_or(Error::Closed);
            state.terminal = Some(terminal.clone());
            if let Some(conn) = state.conn.take() {
                conn.cancel();
            }
            state.queue.clear();
            if let Some(waker) = state.waker.take() {
                waker.wake();
            }
            (
                terminal,
                std::mem::take(&mut state.outstanding),
                state.epoch,
            )
        };
        for (req_id, pending) in outstanding {
            trace!(req_id, "failing outstanding request on close");
            let _ = pending.tx.send(Err(terminal.clone()));
        }
        self.ended.send_modify(|gen| *gen = (*gen).max(epoch));
    }

    /// Whether [`StreamSession::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Number of requests awaiting a response (test and diagnostics hook).
    pub fn outstanding_len(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    fn terminal_error(&self) -> Error {
        self.state
            .lock()
            .terminal
            .clone()
            .unwrap_or(Error::Closed)
    }

    async fn response_loop(
        &self,
        mut inbound: BoxStream<'static, Result<S>>,
        conn: CancellationToken,
        epoch: u64,
    ) {
        let err = loop {
            let frame = tokio::select! {
                _ = conn.cancelled() => {
                    break Error::Transport {
                        kind: TransportKind::Cancelled,
                        message: "stream disconnected locally".into(),
                    };
                }
                frame = inbound.next() => frame,
            };
            match frame {
                Some(Ok(frame)) => {
                    match self.hooks.on_frame(&frame) {
                        FrameAction::Continue => {}
                        FrameAction::Reply(reply) => {
                            // Best effort; a closed session drops the reply.
                            let _ = self.send(reply);
                        }
                        FrameAction::Disconnect(err) => break err,
                    }
                    if let Some(req_id) = self.hooks.request_id(&frame) {
                        let pending = self.state.lock().outstanding.remove(&req_id);
                        match pending {
                            Some(pending) => {
                                let result = self.hooks.check_result(&frame).map(|()| frame);
                                let _ = pending.tx.send(result);
                            }
                            None => {
                                trace!(req_id, "response for unknown request id, discarding");
                            }
                        }
                    }
                }
                Some(Err(err)) => break err,
                None => {
                    break Error::Transport {
                        kind: TransportKind::Broken,
                        message: "stream closed by peer".into(),
                    };
                }
            }
        };

        debug!(epoch, error = %err, "connection ended");
        {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.conn = None;
            }
            state.last_error = Some(err);
        }
        self.ended.send_modify(|gen| *gen = (*gen).max(epoch));
    }
}

/// Outbound half of one connection: drains the session queue while its
/// epoch is current, then ends.
struct OutboundQueue<R, S> {
    state: Arc<Mutex<SessionState<R, S>>>,
    epoch: u64,
}

impl<R, S> Stream for OutboundQueue<R, S> {
    type Item = R;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<R>> {
        let mut state = self.state.lock();
        if state.terminal.is_some() || state.epoch != self.epoch {
            return Poll::Ready(None);
        }
        if let Some((_, request)) = state.queue.pop_front() {
            return Poll::Ready(Some(request));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
