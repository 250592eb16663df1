use crate::error::RelayError;
use crate::timeout::TimeoutHandle;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Returns the current time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One user's pending upload request.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub target_filename: String,
    pub created_at: Instant,
    pub created_at_ms: u64,
    /// Exclusively owned; disarmed whenever the session resolves other than by expiry.
    timeout: TimeoutHandle,
}

impl Session {
    pub fn disarm(&self) {
        self.timeout.disarm();
    }

    pub fn is_disarmed(&self) -> bool {
        self.timeout.is_disarmed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            user_id: self.user_id.clone(),
            target_filename: self.target_filename.clone(),
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_id: String,
    pub target_filename: String,
    pub created_at_ms: u64,
}

/// Sessions keyed by user id.
///
/// Backed by `DashMap`, so mutations for one user only lock that key's shard
/// and unrelated users never serialize on a global lock. `resolve` is a single
/// atomic removal: when cancel, fulfillment and expiry race for the same
/// session, exactly one of them gets it back.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert a session for `user_id` unless one already exists.
    ///
    /// `arm` is called with the new session's id while the key is still locked,
    /// so the stored session always carries its timeout handle.
    pub fn try_create(
        &self,
        user_id: &str,
        target_filename: &str,
        arm: impl FnOnce(Uuid) -> TimeoutHandle,
    ) -> Result<SessionInfo, RelayError> {
        match self.sessions.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(RelayError::AlreadyPending(user_id.to_string())),
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                let session = Session {
                    id,
                    user_id: user_id.to_string(),
                    target_filename: target_filename.to_string(),
                    created_at: Instant::now(),
                    created_at_ms: now_ms(),
                    timeout: arm(id),
                };
                let info = session.info();
                slot.insert(session);
                Ok(info)
            }
        }
    }

    /// Remove and return the session for `user_id`.
    pub fn resolve(&self, user_id: &str) -> Result<Session, RelayError> {
        self.sessions
            .remove(user_id)
            .map(|(_, session)| session)
            .ok_or_else(|| RelayError::NotFound(user_id.to_string()))
    }

    /// Remove and return the session for `user_id` only if it is session `id`.
    ///
    /// Used by expiry so a stale timer can never resolve a newer session of
    /// the same user.
    pub fn resolve_session(&self, user_id: &str, id: Uuid) -> Result<Session, RelayError> {
        self.sessions
            .remove_if(user_id, |_, session| session.id == id)
            .map(|(_, session)| session)
            .ok_or_else(|| RelayError::NotFound(user_id.to_string()))
    }

    /// Whether `user_id` currently has a session.
    pub fn peek(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<SessionInfo> {
        self.sessions.get(user_id).map(|r| r.value().info())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
