use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::principal::Principal;

pub type SessionId = String;

/// Attribute key holding the serialized principal of an authenticated session.
pub const PRINCIPAL_KEY: &str = "principal";

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub attributes: HashMap<String, Value>,
}

impl Session {
    fn fresh(id: SessionId, now: DateTime<Utc>) -> Self {
        Self { id, created_at: now, last_accessed_at: now, attributes: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Principal stored in the session; an unreadable attribute counts as anonymous.
    pub fn principal(&self) -> Option<Principal> {
        self.attributes
            .get(PRINCIPAL_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_principal(&mut self, principal: &Principal) {
        // Principal is plain strings; serialization cannot fail.
        let v = serde_json::to_value(principal).unwrap_or(Value::Null);
        self.attributes.insert(PRINCIPAL_KEY.to_string(), v);
    }

    pub fn clear_principal(&mut self) -> Option<Principal> {
        self.attributes
            .remove(PRINCIPAL_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    /// The id is no longer live: destroyed, expired, or regenerated away.
    #[error("session is no longer live")]
    Stale,
}

/// Keyed table of session records. Knows nothing about authentication.
///
/// Implementations must make every per-id operation atomic; in particular
/// `regenerate` must never leave both the old and the new id loadable.
pub trait SessionStore: Send + Sync {
    fn create(&self) -> Result<Session, StoreError>;
    fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn regenerate(&self, session: &Session) -> Result<Session, StoreError>;
    fn destroy(&self, id: &str) -> Result<(), StoreError>;

    /// Drop every expired record; returns how many were removed.
    fn sweep_expired(&self) -> usize { 0 }
}

/// Short, log-safe prefix of a session id.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn gen_id() -> Result<SessionId, StoreError> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| StoreError::Unavailable(format!("entropy source failed: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// In-process session store with idle expiry.
///
/// Expiry is checked lazily whenever an id is touched; `sweep_expired` reclaims
/// records nobody asks for again.
pub struct MemorySessionStore {
    idle_timeout: Duration,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self { Self::new(Duration::from_secs(30 * 60)) }
}

impl MemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn idle_timeout(&self) -> Duration { self.idle_timeout }

    /// Number of records held, including expired ones not yet swept.
    pub fn len(&self) -> usize { self.sessions.read().len() }

    pub fn is_empty(&self) -> bool { self.sessions.read().is_empty() }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let idle = (now - session.last_accessed_at).to_std().unwrap_or(Duration::ZERO);
        idle > self.idle_timeout
    }

    /// Ensure `id` refers to a live record, evicting it if it has expired.
    fn check_live(&self, map: &mut HashMap<SessionId, Session>, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        match map.get(id).map(|s| self.is_expired(s, now)) {
            None => Err(StoreError::Stale),
            Some(true) => {
                map.remove(id);
                debug!(target: "session", sid = short_id(id), "session expired");
                Err(StoreError::Stale)
            }
            Some(false) => Ok(()),
        }
    }

    fn unique_id(map: &HashMap<SessionId, Session>) -> Result<SessionId, StoreError> {
        let mut id = gen_id()?;
        while map.contains_key(&id) { id = gen_id()?; }
        Ok(id)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> Result<Session, StoreError> {
        let now = Utc::now();
        let mut map = self.sessions.write();
        let id = Self::unique_id(&map)?;
        let session = Session::fresh(id.clone(), now);
        map.insert(id, session.clone());
        debug!(target: "session", sid = short_id(&session.id), "session created");
        Ok(session)
    }

    fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let mut map = self.sessions.write();
        match self.check_live(&mut map, id, now) {
            Err(StoreError::Stale) => return Ok(None),
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        Ok(map.get_mut(id).map(|s| {
            s.last_accessed_at = now;
            s.clone()
        }))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut map = self.sessions.write();
        self.check_live(&mut map, &session.id, now)?;
        if let Some(live) = map.get_mut(&session.id) {
            live.attributes = session.attributes.clone();
            live.last_accessed_at = now;
        }
        Ok(())
    }

    fn regenerate(&self, session: &Session) -> Result<Session, StoreError> {
        let now = Utc::now();
        let mut map = self.sessions.write();
        self.check_live(&mut map, &session.id, now)?;
        let new_id = Self::unique_id(&map)?;
        let created_at = match map.remove(&session.id) {
            Some(old) => old.created_at,
            None => return Err(StoreError::Stale),
        };
        let regenerated = Session {
            id: new_id.clone(),
            created_at,
            last_accessed_at: now,
            attributes: session.attributes.clone(),
        };
        map.insert(new_id, regenerated.clone());
        debug!(
            target: "session",
            old = short_id(&session.id),
            new = short_id(&regenerated.id),
            "session id regenerated"
        );
        Ok(regenerated)
    }

    fn destroy(&self, id: &str) -> Result<(), StoreError> {
        if self.sessions.write().remove(id).is_some() {
            debug!(target: "session", sid = short_id(id), "session destroyed");
        }
        Ok(())
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut map = self.sessions.write();
        let before = map.len();
        map.retain(|_, s| !self.is_expired(s, now));
        before - map.len()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
