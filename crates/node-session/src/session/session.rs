//! Session handle
//!
//! Owns the identity, status and outbound queue of one client connection.
//! `start` spawns the reader and writer tasks; `close` is idempotent and the
//! cleanup (close listeners, connection release, registry removal) runs once.

use super::listener::{self, ErrorListener, ListenerFlow, MessageHandler, SessionListener};
use super::settings::Settings;
use super::state::{AtomicStatus, SessionStatus};
use super::tasks;
use super::{FrontendId, Sid, Uid};
use crate::error::{SessionError, SessionResult};
use crate::network::{NetworkEntity, NetworkError};
use crate::registry::SessionRegistry;
use bytes::Bytes;
use node_common::SessionConfig;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

/// Server-side handle for one live client connection
pub struct Session {
    sid: Sid,
    uid: AtomicI64,
    frontend_id: FrontendId,
    status: AtomicStatus,

    /// Set once `start` has been called
    started: AtomicBool,
    /// Set once cleanup has begun
    released: AtomicBool,

    settings: Settings,
    entity: Option<Arc<dyn NetworkEntity>>,
    registry: Weak<SessionRegistry>,
    config: SessionConfig,

    outbound: mpsc::Sender<Bytes>,
    /// Taken by the writer task on start
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    /// Flips to `true` when the session starts closing
    shutdown: watch::Sender<bool>,
    /// Flips to `true` when cleanup has finished
    finished: watch::Sender<bool>,

    on_message: RwLock<Option<MessageHandler>>,
    on_close: RwLock<Vec<SessionListener>>,
    on_error: RwLock<Vec<ErrorListener>>,

    span: Span,
    created_at: Instant,
}

impl Session {
    /// Create a standalone session that binds uids locally
    pub fn new(
        sid: Sid,
        frontend_id: impl Into<FrontendId>,
        entity: Option<Arc<dyn NetworkEntity>>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::build(sid, frontend_id.into(), entity, config, Weak::new())
    }

    /// Create a session whose binding and removal go through `registry`
    pub(crate) fn attached(
        sid: Sid,
        frontend_id: FrontendId,
        entity: Arc<dyn NetworkEntity>,
        config: SessionConfig,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        Self::build(sid, frontend_id, Some(entity), config, registry)
    }

    fn build(
        sid: Sid,
        frontend_id: FrontendId,
        entity: Option<Arc<dyn NetworkEntity>>,
        config: SessionConfig,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        let span = tracing::info_span!(
            "session",
            sid,
            uid = tracing::field::Empty,
            frontend = %frontend_id
        );

        Arc::new(Self {
            sid,
            uid: AtomicI64::new(0),
            frontend_id,
            status: AtomicStatus::new(),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            settings: Settings::new(),
            entity,
            registry,
            config,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown,
            finished,
            on_message: RwLock::new(None),
            on_close: RwLock::new(Vec::new()),
            on_error: RwLock::new(Vec::new()),
            span,
            created_at: Instant::now(),
        })
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Bound user id, 0 when unbound
    pub fn uid(&self) -> Uid {
        self.uid.load(Ordering::Acquire)
    }

    pub fn frontend_id(&self) -> &str {
        &self.frontend_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.load()
    }

    /// Move the session along its handshake states.
    ///
    /// Returns the previous status. `Closed` is not a valid target; use [`Session::close`].
    pub fn set_status(&self, next: SessionStatus) -> SessionResult<SessionStatus> {
        let previous = self.status.transition(next).map_err(|current| {
            if current.is_closed() {
                SessionError::SessionClosed(self.sid)
            } else {
                SessionError::InvalidTransition { from: current, to: next }
            }
        })?;

        debug!(parent: &self.span, from = %previous, to = %next, "status changed");
        Ok(previous)
    }

    pub fn is_closed(&self) -> bool {
        self.status().is_closed()
    }

    /// Started and not yet closed
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.is_closed()
    }

    pub fn is_bind(&self) -> bool {
        self.uid() > 0
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tracing span carrying this session's sid and uid
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Remote address of the client, empty if unknown
    pub fn remote_address(&self) -> String {
        self.entity
            .as_ref()
            .and_then(|entity| entity.remote_addr())
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    /// Bind a user id to this session
    pub fn bind(&self, uid: Uid) -> SessionResult<()> {
        if uid < 1 {
            return Err(SessionError::IllegalUid(uid));
        }

        match self.registry.upgrade() {
            Some(registry) => registry.bind(self.sid, uid),
            None => {
                self.store_uid(uid);
                Ok(())
            }
        }
    }

    /// Clear the bound user id. No-op when unbound.
    pub fn unbind(&self) {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.unbind_session(self);
            }
            None => {
                self.take_uid();
            }
        }
    }

    pub(crate) fn store_uid(&self, uid: Uid) -> Uid {
        let previous = self.uid.swap(uid, Ordering::AcqRel);
        self.span.record("uid", uid);
        previous
    }

    pub(crate) fn take_uid(&self) -> Uid {
        let previous = self.uid.swap(0, Ordering::AcqRel);
        self.span.record("uid", 0);
        previous
    }

    /// Queue `payload` for the writer task.
    ///
    /// Waits while the queue is full. Returns `false` without error when the
    /// session is not running, so sends racing a close are dropped silently.
    pub async fn send(&self, payload: impl Into<Bytes>) -> bool {
        if !self.is_running() {
            debug!(parent: &self.span, "session not running, payload dropped");
            return false;
        }

        let payload = payload.into();
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closing| *closing) => false,
            sent = self.outbound.send(payload) => sent.is_ok(),
        }
    }

    /// Queue `payload` without waiting.
    ///
    /// Usable from the message handler. Returns `Ok(false)` when the session is
    /// not running and [`SessionError::QueueFull`] when there is no capacity.
    pub fn try_send(&self, payload: impl Into<Bytes>) -> SessionResult<bool> {
        if !self.is_running() {
            debug!(parent: &self.span, "session not running, payload dropped");
            return Ok(false);
        }

        match self.outbound.try_send(payload.into()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Err(SessionError::QueueFull(self.sid)),
            Err(TrySendError::Closed(_)) => Ok(false),
        }
    }

    /// Send payloads one after another, stopping at the first one dropped.
    ///
    /// Returns how many were queued. Not atomic: earlier payloads stay queued.
    pub async fn send_batch<I, P>(&self, payloads: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let mut queued = 0;
        for payload in payloads {
            if !self.send(payload).await {
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Hand encoded bytes straight to the network entity
    pub async fn send_raw(&self, payload: impl Into<Bytes>) -> SessionResult<()> {
        let Some(entity) = &self.entity else {
            debug!(parent: &self.span, "no network entity, raw payload dropped");
            return Ok(());
        };

        Ok(entity.send_raw(payload.into()).await?)
    }

    /// Forward a call to a remote node
    pub async fn rpc(&self, route: &str, payload: impl Into<Bytes>) -> SessionResult<()> {
        Ok(self.entity()?.rpc(route, payload.into()).await?)
    }

    /// Push a message to the client
    pub async fn push(&self, route: &str, payload: impl Into<Bytes>) -> SessionResult<()> {
        Ok(self.entity()?.push(route, payload.into()).await?)
    }

    /// Answer client request `mid`
    pub async fn response(&self, mid: u64, payload: impl Into<Bytes>) -> SessionResult<()> {
        Ok(self.entity()?.response(mid, payload.into()).await?)
    }

    /// Kick the client, then close the session if `close` is set.
    ///
    /// A failed kick leaves the session open.
    pub async fn kick(&self, reason: &str, close: bool) -> SessionResult<()> {
        if let Err(err) = self.entity()?.kick(reason).await {
            warn!(parent: &self.span, error = %err, reason, "kick failed");
            return Err(err.into());
        }

        info!(parent: &self.span, reason, "session kicked");
        if close {
            self.close();
        }
        Ok(())
    }

    fn entity(&self) -> Result<&Arc<dyn NetworkEntity>, NetworkError> {
        self.entity.as_ref().ok_or(NetworkError::Detached)
    }

    /// Set the handler that receives inbound bytes. Must be set before `start`.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Session, &[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.on_message.write() = Some(Arc::new(handler));
    }

    /// Add a listener run once when the session closes, before the connection is released
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&Session) -> ListenerFlow + Send + Sync + 'static,
    {
        self.on_close.write().push(Arc::new(listener));
    }

    /// Add a listener run when a transport or dispatch error ends the session
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&Session, &SessionError) + Send + Sync + 'static,
    {
        self.on_error.write().push(Arc::new(listener));
    }

    /// Spawn the reader and writer tasks over the given connection halves.
    ///
    /// # Panics
    /// Panics if no message handler has been registered.
    pub fn start<R, W>(self: &Arc<Self>, reader: R, writer: W) -> SessionResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(handler) = self.on_message.read().clone() else {
            panic!("session {}: reader started without a message handler", self.sid);
        };

        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted(self.sid));
        }
        if self.is_closed() {
            self.release_detached();
            return Err(SessionError::SessionClosed(self.sid));
        }
        let outbound = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(SessionError::AlreadyStarted(self.sid))?;

        info!(parent: &self.span, remote = %self.remote_address(), "session started");

        let writer = tokio::spawn(
            tasks::write_loop(Arc::clone(self), writer, outbound).instrument(self.span.clone()),
        );
        tokio::spawn(
            tasks::read_loop(Arc::clone(self), reader, writer, handler)
                .instrument(self.span.clone()),
        );

        Ok(())
    }

    /// Start over a TCP stream
    pub fn start_tcp(self: &Arc<Self>, stream: TcpStream) -> SessionResult<()> {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(parent: &self.span, error = %err, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        self.start(reader, writer)
    }

    /// Close the session. Safe to call any number of times from anywhere.
    pub fn close(&self) {
        if !self.begin_close() {
            return;
        }

        // Without a reader task nobody else will run the cleanup.
        if !self.started.load(Ordering::Acquire) {
            self.release_detached();
        }
    }

    /// Resolves once close listeners ran, the connection was released and the
    /// registry forgot this session
    pub async fn wait_closed(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Transition to `Closed` and wake both tasks. Only the first caller gets `true`.
    pub(super) fn begin_close(&self) -> bool {
        if !self.status.close() {
            return false;
        }

        self.shutdown.send_replace(true);
        debug!(parent: &self.span, "session closing");
        true
    }

    pub(super) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(super) fn emit_error(&self, err: &SessionError) {
        let listeners = self.on_error.read().clone();
        for listener in &listeners {
            listener::guarded("session.on_error", self.sid, || listener(self, err));
        }
    }

    /// Cleanup after the reader task stopped: listeners, then the connection.
    pub(super) async fn release<W>(&self, writer: JoinHandle<W>)
    where
        W: AsyncWrite + Unpin,
    {
        if !self.notify_closed() {
            return;
        }

        match writer.await {
            Ok(mut writer) => {
                if let Err(err) = writer.shutdown().await {
                    warn!(parent: &self.span, error = %err, "failed to shut down connection");
                }
            }
            Err(err) => warn!(parent: &self.span, error = %err, "writer task failed"),
        }

        self.detach();
    }

    /// Cleanup for a session whose tasks never ran
    fn release_detached(&self) {
        if self.notify_closed() {
            self.detach();
        }
    }

    fn notify_closed(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        let listeners = self.on_close.read().clone();
        listener::run_chain("session.on_close", &listeners, self);
        true
    }

    fn detach(&self) {
        if let Some(entity) = &self.entity {
            if listener::guarded("entity.close", self.sid, || entity.close()).is_none() {
                warn!(parent: &self.span, "failed to close network entity");
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.on_close_process(self);
        }

        // Handlers may hold the session itself
        self.on_message.write().take();
        self.on_close.write().clear();
        self.on_error.write().clear();

        self.finished.send_replace(true);
        info!(
            parent: &self.span,
            age_ms = self.age().as_millis() as u64,
            "session closed"
        );
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sid = {}, uid = {}, address = {}",
            self.sid,
            self.uid(),
            self.remote_address()
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("uid", &self.uid())
            .field("frontend_id", &self.frontend_id)
            .field("status", &self.status())
            .field("settings", &self.settings)
            .finish()
    }
}
