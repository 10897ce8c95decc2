//! Logical sessions and the server-session pool backing them.

mod cluster_time;
mod pool;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
    },
    time::{Duration, Instant},
};

use bson::{doc, spec::BinarySubtype, Binary, Bson, Document};
use uuid::Uuid;

use crate::{error::Result, sdam::TopologyWatcher};

pub use cluster_time::ClusterTime;
pub(crate) use pool::ServerSessionPool;

/// A logical session used for ordering sequential operations and for identifying retryable
/// writes through a transaction number.
///
/// Sessions are checked out of the owning topology's server-session pool by
/// [`Topology::start_session`](crate::Topology::start_session) and tracked by the topology until
/// they end. Ending a session (explicitly through [`Session::end`] or by dropping it) returns
/// the underlying server session to the pool; closing the topology ends every outstanding
/// session.
#[derive(Debug)]
pub struct Session {
    id: Document,
    state: Arc<SessionState>,
    pool: Arc<ServerSessionPool>,
    registry: SessionRegistry,
    watcher: TopologyWatcher,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Session {
    pub(crate) fn start(
        pool: Arc<ServerSessionPool>,
        registry: SessionRegistry,
        watcher: TopologyWatcher,
    ) -> Session {
        let server_session = pool.check_out(watcher.logical_session_timeout());
        let id = server_session.id.clone();
        let state = Arc::new(SessionState {
            key: Uuid::new_v4(),
            server_session: Mutex::new(Some(server_session)),
            in_transaction: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });
        registry.insert(state.clone());
        Session {
            id,
            state,
            pool,
            registry,
            watcher,
        }
    }

    /// The id document of this session.
    pub fn id(&self) -> &Document {
        &self.id
    }

    /// Whether this session is currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.state.in_transaction.load(Ordering::SeqCst)
    }

    /// Marks the start of a transaction on this session, incrementing the transaction number.
    /// Operations dispatched with a session that is in a transaction are never retried as
    /// retryable writes.
    ///
    /// Running the corresponding `commitTransaction`/`abortTransaction` commands on the
    /// deployment is the caller's responsibility; this type only tracks the state the topology
    /// core needs.
    pub fn start_transaction(&mut self) -> Result<()> {
        if self.is_ended() {
            return Err(crate::error::Error::invalid_argument(
                "cannot start a transaction on an ended session",
            ));
        }
        if self.in_transaction() {
            return Err(crate::error::Error::invalid_argument(
                "transaction already in progress",
            ));
        }
        self.get_and_increment_txn_number();
        self.state.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Marks the transaction on this session as committed.
    pub fn commit_transaction(&mut self) {
        self.state.in_transaction.store(false, Ordering::SeqCst);
    }

    /// Marks the transaction on this session as aborted.
    pub fn abort_transaction(&mut self) {
        self.state.in_transaction.store(false, Ordering::SeqCst);
    }

    /// Whether this session has ended.
    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// Ends this session, removing it from the topology's active set and returning the
    /// underlying server session to the pool. Ending an already-ended session is a no-op.
    pub fn end(&mut self) {
        self.registry.remove(&self.state.key);
        if let Some(server_session) = self.state.end() {
            self.pool
                .check_in(server_session, self.watcher.logical_session_timeout());
        }
    }

    /// The current transaction number of the underlying server session.
    pub fn txn_number(&self) -> i64 {
        self.state
            .server_session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.txn_number)
            .unwrap_or(0)
    }

    /// Increments the transaction number and returns the new value.
    pub(crate) fn get_and_increment_txn_number(&mut self) -> i64 {
        let mut guard = self.state.server_session.lock().unwrap();
        match guard.as_mut() {
            Some(session) => {
                session.txn_number += 1;
                session.last_use = Instant::now();
                session.txn_number
            }
            None => 0,
        }
    }

    /// Marks the underlying server session as dirty so it is discarded instead of reused.
    pub(crate) fn mark_dirty(&mut self) {
        if let Some(session) = self.state.server_session.lock().unwrap().as_mut() {
            session.dirty = true;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

/// The session bookkeeping shared between a `Session` handle and the topology that tracks it.
/// The topology keeps a reference so teardown can end sessions the caller still holds.
#[derive(Debug)]
pub(crate) struct SessionState {
    key: Uuid,
    server_session: Mutex<Option<ServerSession>>,
    in_transaction: AtomicBool,
    ended: AtomicBool,
}

impl SessionState {
    /// Marks the session ended, yielding the server session exactly once.
    pub(crate) fn end(&self) -> Option<ServerSession> {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.server_session.lock().unwrap().take()
        } else {
            None
        }
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

/// The set of sessions a topology has handed out that have not ended yet.
#[derive(Clone, Debug, Default)]
pub(crate) struct SessionRegistry {
    active: Arc<Mutex<HashMap<Uuid, Arc<SessionState>>>>,
}

impl SessionRegistry {
    fn insert(&self, state: Arc<SessionState>) {
        self.active.lock().unwrap().insert(state.key, state);
    }

    fn remove(&self, key: &Uuid) {
        self.active.lock().unwrap().remove(key);
    }

    pub(crate) fn drain(&self) -> Vec<Arc<SessionState>> {
        self.active.lock().unwrap().drain().map(|(_, v)| v).collect()
    }
}

/// Client side abstraction of a server session. These are pooled and may be associated with
/// multiple `Session`s over the course of their lifetime.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// The id of the server session to which this corresponds.
    pub(crate) id: Document,

    /// The last time an operation was executed with this session.
    last_use: Instant,

    /// Whether a network error was encountered while using this session.
    pub(crate) dirty: bool,

    /// A monotonically increasing transaction number for this session.
    pub(crate) txn_number: i64,
}

impl ServerSession {
    /// Creates a new session, generating the id client side.
    fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Determines if this server session is about to expire in a short amount of time (1
    /// minute).
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        let timeout = match logical_session_timeout {
            Some(timeout) => timeout,
            None => return false,
        };
        let expiration_date = self.last_use + timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}
