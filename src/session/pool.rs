use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use bson::Document;

use super::ServerSession;

#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Checks out a server session from the pool. Before doing so, it first discards all the
    /// expired sessions. If there are no sessions left in the pool after clearing expired ones
    /// out, a new session will be created.
    pub(crate) fn check_out(&self, logical_session_timeout: Option<Duration>) -> ServerSession {
        let mut pool = self.pool.lock().unwrap();
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks a server session back into the pool. If it is about to expire or is dirty, it will
    /// be discarded.
    pub(crate) fn check_in(&self, session: ServerSession, logical_session_timeout: Option<Duration>) {
        let mut pool = self.pool.lock().unwrap();
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    /// Empties the pool, returning the ids of every pooled session so they can be ended on the
    /// server.
    pub(crate) fn extract_all(&self) -> Vec<Document> {
        self.pool
            .lock()
            .unwrap()
            .drain(..)
            .map(|session| session.id)
            .collect()
    }
}
