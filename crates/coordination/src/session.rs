//! Coordination session lifecycle and semaphore operations.
//!
//! A session owns one [`StreamSession`] and a connection-loop task that
//! keeps it alive: every attempt sends `sessionStart` carrying the
//! preserved session id and a fresh seqNo, waits for `sessionStarted`, and
//! then parks on the disconnect signal. Transient failures loop with
//! backoff; `SESSION_EXPIRED`/`BAD_SESSION` reset the session id to zero so
//! the server mints a new session (releasing every semaphore acquired under
//! the old one — holders are told through [`SessionEvent::Expired`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, trace, warn};

use ydbx_core::{retry, Ctx, Error, Result, RetryConfig, TransportKind};
use ydbx_grpc::bidi::{BidiTransport, FrameAction, StreamHooks, StreamSession};
use ydbx_grpc::driver::{CoordinationGrpcTransport, Driver};
use ydbx_grpc::pb::coordination as pb;
use ydbx_grpc::pb::coordination::session_request::Request;
use ydbx_grpc::pb::coordination::session_response::Response;
use ydbx_grpc::status::check_server_status;

use crate::options::{
    AcquireSemaphoreOptions, CreateSemaphoreOptions, DescribeSemaphoreOptions,
    DescribeSemaphoreResult, SessionOptions,
};

/// Events a session broadcasts to its subscribers.
///
/// Delivery is at-least-once around reconnects; consumers must tolerate
/// duplicates.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The server invalidated the session. Every semaphore acquired under
    /// the old session id has been released server-side; holders must
    /// re-acquire.
    Expired {
        /// The invalidated session id.
        session_id: u64,
    },
    /// A watched semaphore changed. Watches are one-shot: re-watch with
    /// another describe call.
    SemaphoreChanged {
        name: String,
        data_changed: bool,
        owners_changed: bool,
    },
}

struct SharedState {
    session_id: u64,
    /// Watch-registering describe req id → semaphore name. One-shot.
    watches: HashMap<u64, String>,
    closed: bool,
}

struct SessionHooks {
    state: Arc<Mutex<SharedState>>,
    started: Arc<watch::Sender<u64>>,
    stopped: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHooks {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl StreamHooks<pb::SessionRequest, pb::SessionResponse> for SessionHooks {
    fn on_frame(&self, frame: &pb::SessionResponse) -> FrameAction<pb::SessionRequest> {
        let Some(response) = frame.response.as_ref() else {
            warn!("session response frame without a payload");
            return FrameAction::Continue;
        };
        match response {
            Response::Ping(ping) => FrameAction::Reply(pb::SessionRequest::from_request(
                Request::Pong(pb::PingPong {
                    opaque: ping.opaque,
                }),
            )),
            Response::Failure(failure) => {
                let err = match check_server_status(failure.status, &failure.issues) {
                    Err(err) => err,
                    Ok(()) => Error::Protocol("failure frame carried a success status".into()),
                };
                if matches!(err, Error::SessionExpired | Error::BadSession) {
                    let old_session_id = {
                        let mut state = self.state.lock();
                        let old = state.session_id;
                        state.session_id = 0;
                        state.watches.clear();
                        old
                    };
                    warn!(session_id = old_session_id, error = %err, "session invalidated by server");
                    self.emit(SessionEvent::Expired {
                        session_id: old_session_id,
                    });
                }
                FrameAction::Disconnect(err)
            }
            Response::SessionStarted(started) => {
                self.state.lock().session_id = started.session_id;
                self.started.send_replace(started.session_id);
                FrameAction::Continue
            }
            Response::SessionStopped(stopped) => {
                debug!(session_id = stopped.session_id, "session stopped");
                self.stopped.send_replace(true);
                FrameAction::Continue
            }
            Response::AcquireSemaphorePending(pending) => {
                debug!(req_id = pending.req_id, "acquire is pending on a contended semaphore");
                FrameAction::Continue
            }
            Response::DescribeSemaphoreChanged(changed) => {
                let name = self.state.lock().watches.remove(&changed.req_id);
                match name {
                    Some(name) => self.emit(SessionEvent::SemaphoreChanged {
                        name,
                        data_changed: changed.data_changed,
                        owners_changed: changed.owners_changed,
                    }),
                    None => {
                        trace!(req_id = changed.req_id, "change notification without a watch")
                    }
                }
                FrameAction::Continue
            }
            // Tagged results resolve through the stream runtime's request
            // map; pongs need no action.
            _ => FrameAction::Continue,
        }
    }

    fn request_id(&self, frame: &pb::SessionResponse) -> Option<u64> {
        frame.request_id()
    }

    fn check_result(&self, frame: &pb::SessionResponse) -> Result<()> {
        match frame.result_status() {
            Some((status, issues)) => check_server_status(status, issues),
            None => Ok(()),
        }
    }
}

struct SessionInner {
    path: String,
    options: SessionOptions,
    stream: StreamSession<pb::SessionRequest, pb::SessionResponse>,
    state: Arc<Mutex<SharedState>>,
    req_id: AtomicU64,
    seq_no: AtomicU64,
    started: Arc<watch::Sender<u64>>,
    stopped: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<SessionEvent>,
    /// Lifetime of the connection loop; cancelled on close.
    ctx: Ctx,
}

impl SessionInner {
    fn next_req_id(&self) -> u64 {
        self.req_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// One connection attempt: start the stream, wait for the session
    /// handshake, then park until disconnect. Always returns `Err` so the
    /// retry loop classifies what happened.
    async fn run_connection(
        &self,
        attempt: u32,
        transport: &dyn BidiTransport<pb::SessionRequest, pb::SessionResponse>,
        ready: &Mutex<Option<oneshot::Sender<Result<()>>>>,
    ) -> Result<()> {
        self.ctx.check()?;
        let session_id = self.state.lock().session_id;
        let seq_no = self.seq_no.fetch_add(1, Ordering::SeqCst) + 1;
        let mut started_rx = self.started.subscribe();
        started_rx.borrow_and_update();

        let start = pb::SessionRequest::from_request(Request::SessionStart(pb::SessionStart {
            path: self.path.clone(),
            session_id,
            timeout_millis: self.options.timeout.as_millis() as u64,
            description: self.options.description.clone(),
            seq_no,
        }));
        debug!(attempt, session_id, seq_no, path = %self.path, "starting coordination session");

        // The transport waits for driver readiness before dialing.
        self.stream.start(transport, Some(start), &self.ctx).await?;

        match tokio::time::timeout(self.options.start_timeout, started_rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(Error::Closed),
            Err(_) => {
                self.stream.disconnect();
                let _ = self.stream.wait_for_disconnect().await;
                return Err(Error::Transport {
                    kind: TransportKind::TimedOut,
                    message: "timed out waiting for sessionStarted".into(),
                });
            }
        }
        info!(session_id = *started_rx.borrow(), "coordination session established");
        if let Some(tx) = ready.lock().take() {
            let _ = tx.send(Ok(()));
        }

        Err(self.stream.wait_for_disconnect().await)
    }
}

async fn run_connection_loop(
    inner: Arc<SessionInner>,
    transport: Arc<dyn BidiTransport<pb::SessionRequest, pb::SessionResponse>>,
    ready: oneshot::Sender<Result<()>>,
) {
    let ready = Mutex::new(Some(ready));
    let config = RetryConfig::unbounded_stream()
        .with_base_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_jitter(0.5);

    let result: Result<()> = retry(&config, &inner.ctx, |attempt| {
        let inner = inner.clone();
        let transport = transport.clone();
        let ready = &ready;
        async move { inner.run_connection(attempt, transport.as_ref(), ready).await }
    })
    .await;

    let err = result.err().unwrap_or(Error::Closed);
    if !matches!(err, Error::Closed | Error::Cancelled) {
        warn!(error = %err, "coordination session terminated");
    }
    inner.stream.close(Some(err.clone()));
    let tx = ready.lock().take();
    if let Some(tx) = tx {
        let _ = tx.send(Err(err));
    }
}

/// Client-side handle for the coordination service.
pub struct CoordinationClient {
    driver: Arc<Driver>,
}

impl CoordinationClient {
    pub fn new(driver: Arc<Driver>) -> Self {
        CoordinationClient { driver }
    }

    /// Open a session against the coordination node at `path`. Resolves
    /// once the first `sessionStarted` handshake completes.
    pub async fn session(
        &self,
        path: impl Into<String>,
        options: SessionOptions,
        ctx: &Ctx,
    ) -> Result<CoordinationSession> {
        let transport = Arc::new(CoordinationGrpcTransport::new(self.driver.clone()));
        CoordinationSession::connect(transport, path.into(), options, ctx).await
    }
}

/// A live coordination session.
///
/// The session transparently reconnects on transient failures, preserving
/// in-flight semaphore operations. It must be [`close`]d when done;
/// dropping it tears the stream down without the stop handshake.
///
/// [`close`]: CoordinationSession::close
pub struct CoordinationSession {
    inner: Arc<SessionInner>,
}

impl CoordinationSession {
    /// Open a session over an explicit transport. [`CoordinationClient`]
    /// is the gRPC-backed convenience wrapper around this.
    pub async fn connect(
        transport: Arc<dyn BidiTransport<pb::SessionRequest, pb::SessionResponse>>,
        path: String,
        options: SessionOptions,
        ctx: &Ctx,
    ) -> Result<CoordinationSession> {
        let state = Arc::new(Mutex::new(SharedState {
            session_id: 0,
            watches: HashMap::new(),
            closed: false,
        }));
        let started = Arc::new(watch::channel(0u64).0);
        let stopped = Arc::new(watch::channel(false).0);
        let (events, _) = broadcast::channel(64);

        let hooks = Arc::new(SessionHooks {
            state: state.clone(),
            started: started.clone(),
            stopped: stopped.clone(),
            events: events.clone(),
        });

        let inner = Arc::new(SessionInner {
            path,
            options,
            stream: StreamSession::new(hooks),
            state,
            req_id: AtomicU64::new(0),
            seq_no: AtomicU64::new(0),
            started,
            stopped,
            events,
            ctx: Ctx::background(),
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_connection_loop(inner.clone(), transport, ready_tx));

        let session = CoordinationSession { inner };
        let first_start = async {
            match ready_rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Closed),
            }
        };
        match ctx.run(first_start).await {
            Ok(()) => Ok(session),
            Err(err) => {
                session.teardown();
                Err(err)
            }
        }
    }

    /// The server-assigned session id; 0 until the first handshake.
    pub fn session_id(&self) -> u64 {
        self.inner.state.lock().session_id
    }

    /// The coordination node path this session is attached to.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Subscribe to [`SessionEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Acquire `count` units of a semaphore. Resolves with `true` once
    /// acquired, or `false` if the server-side acquire timeout elapsed
    /// first.
    pub async fn acquire_semaphore(
        &self,
        options: AcquireSemaphoreOptions,
        ctx: &Ctx,
    ) -> Result<bool> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let timeout_millis = options
            .timeout
            .map(|t| t.as_millis() as u64)
            .unwrap_or(u64::MAX);
        let frame = pb::SessionRequest::from_request(Request::AcquireSemaphore(
            pb::AcquireSemaphore {
                req_id,
                name: options.name,
                timeout_millis,
                count: options.count,
                data: options.data,
                ephemeral: options.ephemeral,
            },
        ));
        let response = self.inner.stream.send_request(req_id, frame, ctx).await?;
        match response.response {
            Some(Response::AcquireSemaphoreResult(result)) => Ok(result.acquired),
            _ => Err(Error::Protocol("unexpected reply to acquireSemaphore".into())),
        }
    }

    /// Release whatever this session holds of the semaphore. `false` means
    /// nothing was held.
    pub async fn release_semaphore(&self, name: impl Into<String>, ctx: &Ctx) -> Result<bool> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let frame = pb::SessionRequest::from_request(Request::ReleaseSemaphore(
            pb::ReleaseSemaphore {
                req_id,
                name: name.into(),
            },
        ));
        let response = self.inner.stream.send_request(req_id, frame, ctx).await?;
        match response.response {
            Some(Response::ReleaseSemaphoreResult(result)) => Ok(result.released),
            _ => Err(Error::Protocol("unexpected reply to releaseSemaphore".into())),
        }
    }

    /// Create a semaphore. Fails with `ALREADY_EXISTS` if the name is
    /// taken.
    pub async fn create_semaphore(
        &self,
        options: CreateSemaphoreOptions,
        ctx: &Ctx,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let frame =
            pb::SessionRequest::from_request(Request::CreateSemaphore(pb::CreateSemaphore {
                req_id,
                name: options.name,
                limit: options.limit,
                data: options.data,
            }));
        let response = self.inner.stream.send_request(req_id, frame, ctx).await?;
        match response.response {
            Some(Response::CreateSemaphoreResult(_)) => Ok(()),
            _ => Err(Error::Protocol("unexpected reply to createSemaphore".into())),
        }
    }

    /// Replace the data attached to a semaphore.
    pub async fn update_semaphore(
        &self,
        name: impl Into<String>,
        data: Vec<u8>,
        ctx: &Ctx,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let frame =
            pb::SessionRequest::from_request(Request::UpdateSemaphore(pb::UpdateSemaphore {
                req_id,
                name: name.into(),
                data,
            }));
        let response = self.inner.stream.send_request(req_id, frame, ctx).await?;
        match response.response {
            Some(Response::UpdateSemaphoreResult(_)) => Ok(()),
            _ => Err(Error::Protocol("unexpected reply to updateSemaphore".into())),
        }
    }

    /// Delete a semaphore. With `force`, deletes even while held.
    pub async fn delete_semaphore(
        &self,
        name: impl Into<String>,
        force: bool,
        ctx: &Ctx,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let frame =
            pb::SessionRequest::from_request(Request::DeleteSemaphore(pb::DeleteSemaphore {
                req_id,
                name: name.into(),
                force,
            }));
        let response = self.inner.stream.send_request(req_id, frame, ctx).await?;
        match response.response {
            Some(Response::DeleteSemaphoreResult(_)) => Ok(()),
            _ => Err(Error::Protocol("unexpected reply to deleteSemaphore".into())),
        }
    }

    /// Describe a semaphore, optionally registering a one-shot watch. When
    /// `watch_added` comes back `true`, the next data/owner change fires
    /// one [`SessionEvent::SemaphoreChanged`] and the watch is gone.
    pub async fn describe_semaphore(
        &self,
        options: DescribeSemaphoreOptions,
        ctx: &Ctx,
    ) -> Result<DescribeSemaphoreResult> {
        self.inner.ensure_open()?;
        let req_id = self.inner.next_req_id();
        let registers_watch = options.registers_watch();
        if registers_watch {
            // Registered before the request goes out so a change
            // notification racing the result frame still finds the entry.
            self.inner
                .state
                .lock()
                .watches
                .insert(req_id, options.name.clone());
        }
        let frame =
            pb::SessionRequest::from_request(Request::DescribeSemaphore(pb::DescribeSemaphore {
                req_id,
                name: options.name,
                include_owners: options.include_owners,
                include_waiters: options.include_waiters,
                watch_data: options.watch_data,
                watch_owners: options.watch_owners,
            }));

        let drop_watch = |state: &Arc<Mutex<SharedState>>| {
            state.lock().watches.remove(&req_id);
        };
        let response = match self.inner.stream.send_request(req_id, frame, ctx).await {
            Ok(response) => response,
            Err(err) => {
                if registers_watch {
                    drop_watch(&self.inner.state);
                }
                return Err(err);
            }
        };
        match response.response {
            Some(Response::DescribeSemaphoreResult(result)) => {
                if registers_watch && !result.watch_added {
                    drop_watch(&self.inner.state);
                }
                let description = result
                    .semaphore_description
                    .ok_or_else(|| Error::Protocol("describe result missing description".into()))?;
                Ok(DescribeSemaphoreResult {
                    description: description.into(),
                    watch_added: result.watch_added,
                })
            }
            _ => {
                if registers_watch {
                    drop_watch(&self.inner.state);
                }
                Err(Error::Protocol("unexpected reply to describeSemaphore".into()))
            }
        }
    }

    /// Gracefully stop the session: send `sessionStop`, wait up to
    /// `timeout` for the server acknowledgment, then close the stream. The
    /// stream is closed on every exit path. Idempotent.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        debug!(session_id = self.session_id(), "closing coordination session");

        let mut stopped_rx = self.inner.stopped.subscribe();
        let stop = pb::SessionRequest::from_request(Request::SessionStop(pb::SessionStop {}));
        if self.inner.stream.send(stop).is_ok() {
            let stopped = async {
                loop {
                    if *stopped_rx.borrow_and_update() {
                        return;
                    }
                    if stopped_rx.changed().await.is_err() {
                        return;
                    }
                }
            };
            if tokio::time::timeout(timeout, stopped).await.is_err() {
                warn!("timed out waiting for sessionStopped");
            }
        }

        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        self.inner.ctx.cancel();
        self.inner.stream.close(None);
    }
}

impl Drop for CoordinationSession {
    fn drop(&mut self) {
        if !self.inner.state.lock().closed {
            self.teardown();
        }
    }
}
