//! Session registry
//!
//! Uses `DashMap` for the id table and a single lock for the uid table, so a
//! bind and the unbind performed on close can never interleave.
//! Lock order: the uid table may be held while touching the id table, never
//! the other way round.

use crate::error::{SessionError, SessionResult};
use crate::network::NetworkEntity;
use crate::session::{
    guarded, run_chain, BindListener, FrontendId, ListenerFlow, Session, SessionListener, Sid, Uid,
};
use dashmap::DashMap;
use node_common::SessionConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Live sessions of one node, keyed by session id
pub struct SessionRegistry {
    config: SessionConfig,
    next_sid: AtomicI64,

    /// Active sessions by session ID
    sessions: DashMap<Sid, Arc<Session>>,

    /// Bound user ID to session ID
    bindings: RwLock<HashMap<Uid, Sid>>,

    on_create: RwLock<Vec<SessionListener>>,
    on_close: RwLock<Vec<SessionListener>>,
    on_bind: RwLock<Vec<BindListener>>,
    on_unbind: RwLock<Vec<BindListener>>,
}

impl SessionRegistry {
    /// Create a new registry handing `config` to every session it creates
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            next_sid: AtomicI64::new(0),
            sessions: DashMap::new(),
            bindings: RwLock::new(HashMap::new()),
            on_create: RwLock::new(Vec::new()),
            on_close: RwLock::new(Vec::new()),
            on_bind: RwLock::new(Vec::new()),
            on_unbind: RwLock::new(Vec::new()),
        }
    }

    /// Create a new registry wrapped in Arc
    #[must_use]
    pub fn new_shared(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate a fresh session id. The first id is 1.
    pub fn next_sid(&self) -> Sid {
        self.next_sid.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Create and register a session for a new connection.
    ///
    /// On-create listeners run in order until one returns [`ListenerFlow::Stop`].
    /// A stop only ends the chain; the session is registered either way.
    pub fn create(
        self: &Arc<Self>,
        frontend_id: impl Into<FrontendId>,
        entity: Arc<dyn NetworkEntity>,
    ) -> Arc<Session> {
        let session = Session::attached(
            self.next_sid(),
            frontend_id.into(),
            entity,
            self.config.clone(),
            Arc::downgrade(self),
        );
        self.sessions.insert(session.sid(), Arc::clone(&session));

        debug!(parent: session.span(), "session created");

        let listeners = self.on_create.read().clone();
        run_chain("registry.on_create", &listeners, &session);

        session
    }

    /// Get a session by session ID
    pub fn get(&self, sid: Sid) -> Option<Arc<Session>> {
        self.sessions.get(&sid).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.sessions.contains_key(&sid)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of uids currently bound
    pub fn bound_count(&self) -> usize {
        self.bindings.read().len()
    }

    /// Session id bound to `uid`
    pub fn sid_by_uid(&self, uid: Uid) -> Option<Sid> {
        self.bindings.read().get(&uid).copied()
    }

    /// Session bound to `uid`
    pub fn get_by_uid(&self, uid: Uid) -> Option<Arc<Session>> {
        self.sid_by_uid(uid).and_then(|sid| self.get(sid))
    }

    /// Snapshot of all live sessions
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Bind `uid` to session `sid`.
    ///
    /// A uid belongs to at most one live session: binding a uid held by another
    /// open session fails with [`SessionError::UidAlreadyBound`]. Rebinding a
    /// session to a different uid releases its previous uid first.
    ///
    /// # Errors
    /// Returns an error if the uid is below 1, the session is unknown or closed,
    /// or the uid is taken.
    pub fn bind(&self, sid: Sid, uid: Uid) -> SessionResult<()> {
        if uid < 1 {
            return Err(SessionError::IllegalUid(uid));
        }
        let session = self.get(sid).ok_or(SessionError::SessionNotFound(sid))?;

        let previous = {
            let mut bindings = self.bindings.write();

            if session.is_closed() {
                return Err(SessionError::SessionClosed(sid));
            }
            if let Some(&holder) = bindings.get(&uid) {
                if holder != sid && self.get(holder).is_some_and(|other| !other.is_closed()) {
                    return Err(SessionError::UidAlreadyBound { uid, sid: holder });
                }
            }

            let previous = session.store_uid(uid);
            if previous > 0 && previous != uid && bindings.get(&previous) == Some(&sid) {
                bindings.remove(&previous);
            }
            bindings.insert(uid, sid);
            previous
        };

        if previous == uid {
            return Ok(());
        }
        if previous > 0 {
            self.emit_unbind(&session, previous);
        }

        info!(parent: session.span(), uid, "session bound");
        self.emit_bind(&session, uid);
        Ok(())
    }

    /// Unbind session `sid`. No-op when the session is not bound.
    ///
    /// # Errors
    /// Returns [`SessionError::SessionNotFound`] if the session is unknown.
    pub fn unbind(&self, sid: Sid) -> SessionResult<()> {
        let session = self.get(sid).ok_or(SessionError::SessionNotFound(sid))?;
        self.unbind_session(&session);
        Ok(())
    }

    /// Clear the uid of `session` and its mapping, returning the uid it held
    pub(crate) fn unbind_session(&self, session: &Session) -> Option<Uid> {
        let uid = {
            let mut bindings = self.bindings.write();
            let uid = session.take_uid();
            if uid < 1 {
                return None;
            }
            if bindings.get(&uid) == Some(&session.sid()) {
                bindings.remove(&uid);
            }
            uid
        };

        info!(parent: session.span(), uid, "session unbound");
        self.emit_unbind(session, uid);
        Some(uid)
    }

    /// Forget session `sid`. Idempotent.
    pub fn remove(&self, sid: Sid) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&sid).map(|(_, session)| session);
        if removed.is_some() {
            debug!(sid, "session removed");
        }
        removed
    }

    /// Registry side of a session close: close listeners while the uid is
    /// still set, then unbind, then removal
    pub(crate) fn on_close_process(&self, session: &Session) {
        let listeners = self.on_close.read().clone();
        run_chain("registry.on_close", &listeners, session);

        self.unbind_session(session);
        self.remove(session.sid());
    }

    /// Close every live session, returning how many were asked to close
    pub fn close_all(&self) -> usize {
        let sessions = self.sessions();
        for session in &sessions {
            session.close();
        }

        info!(count = sessions.len(), "closed all sessions");
        sessions.len()
    }

    /// Add a listener run when a session is created
    pub fn on_create<F>(&self, listener: F)
    where
        F: Fn(&Session) -> ListenerFlow + Send + Sync + 'static,
    {
        self.on_create.write().push(Arc::new(listener));
    }

    /// Add a listener run when a session closes, before it is unbound
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&Session) -> ListenerFlow + Send + Sync + 'static,
    {
        self.on_close.write().push(Arc::new(listener));
    }

    pub fn on_bind<F>(&self, listener: F)
    where
        F: Fn(&Session, Uid) + Send + Sync + 'static,
    {
        self.on_bind.write().push(Arc::new(listener));
    }

    pub fn on_unbind<F>(&self, listener: F)
    where
        F: Fn(&Session, Uid) + Send + Sync + 'static,
    {
        self.on_unbind.write().push(Arc::new(listener));
    }

    fn emit_bind(&self, session: &Session, uid: Uid) {
        let listeners = self.on_bind.read().clone();
        for listener in &listeners {
            guarded("registry.on_bind", session.sid(), || listener(session, uid));
        }
    }

    fn emit_unbind(&self, session: &Session, uid: Uid) {
        let listeners = self.on_unbind.read().clone();
        for listener in &listeners {
            guarded("registry.on_unbind", session.sid(), || listener(session, uid));
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("bound", &self.bound_count())
            .field("next_sid", &self.next_sid.load(Ordering::Relaxed))
            .finish()
    }
}
