use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::{Clock, Session};

/// In-memory table of issued sessions, keyed by bearer token.
///
/// Expired entries are dropped lazily by [`SessionStore::get`] and in bulk
/// by [`SessionStore::sweep_expired`], which the console runs on a timer.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn put(&self, token: String, session: Session) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(token, session);
    }

    /// Look up a live session. An expired entry is removed and reported absent.
    pub fn get(&self, token: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(token) {
            Some(s) if !s.is_expired_at(now) => return Some(s.clone()),
            Some(_) => {}
            None => return None,
        }
        if let Some(stale) = sessions.remove(token) {
            log::info!("Evicted expired session for user: {}", stale.username);
        }
        None
    }

    pub fn remove(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token)
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        before - sessions.len()
    }

    /// Number of stored sessions that have not expired.
    pub fn live_count(&self) -> usize {
        let now = self.clock.now();
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.values().filter(|s| !s.is_expired_at(now)).count()
    }

    /// Number of stored entries, expired or not.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
