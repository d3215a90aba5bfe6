//! Client sessions: anti-forgery token plus per-session boolean flags.
//! Used by: dedup, validator, handlers::session, handlers::views.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;

use crate::clock::Clock;

const DEFAULT_MAX_CAPACITY: usize = 100_000;
const SESSION_MAX_AGE_DAYS: i64 = 14;
/// Sessions not seen for this long are dropped before their max age.
const SESSION_IDLE_HOURS: i64 = 24;

/// The narrow capability the duplicate-view tracker needs from a session.
pub trait SessionFlags: Send + Sync {
    fn get_flag(&self, key: &str) -> bool;
    fn set_flag(&self, key: &str);
}

pub struct Session {
    id: String,
    csrf_token: String,
    created_at: DateTime<Utc>,
    /// Unix millis of the last lookup.
    last_seen: AtomicI64,
    flags: Mutex<HashSet<String>>,
}

impl Session {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            csrf_token: generate_token(),
            created_at,
            last_seen: AtomicI64::new(created_at.timestamp_millis()),
            flags: Mutex::new(HashSet::new()),
        }
    }

    fn last_seen_millis(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_seen.store(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.created_at > now - Duration::days(SESSION_MAX_AGE_DAYS)
            && self.last_seen_millis() > (now - Duration::hours(SESSION_IDLE_HOURS)).timestamp_millis()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

impl SessionFlags for Session {
    fn get_flag(&self, key: &str) -> bool {
        self.flags.lock().contains(key)
    }

    fn set_flag(&self, key: &str) {
        self.flags.lock().insert(key.to_owned());
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    clock: Arc<dyn Clock>,
    max_capacity: usize,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, max_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            max_capacity,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(s) if s.is_live(now) => {
                s.touch(now);
                Some(s.clone())
            }
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Starts a session. A full store first drops expired sessions, then
    /// the least recently seen one.
    pub fn create(&self) -> Arc<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_capacity {
            sessions.retain(|_, s| s.is_live(now));
        }
        while sessions.len() >= self.max_capacity.max(1) {
            let Some(oldest) = sessions
                .values()
                .min_by_key(|s| s.last_seen_millis())
                .map(|s| s.id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::debug!(session = %oldest, "session store full, evicted least recently seen");
        }
        let session = Arc::new(Session::new(now));
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Returns the caller's live session, or starts a new one.
    pub fn get_or_create(&self, id: Option<&str>) -> (Arc<Session>, bool) {
        match id.and_then(|id| self.get(id)) {
            Some(s) => (s, false),
            None => (self.create(), true),
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reads the session id cookie named `name` from the request headers.
pub fn session_id_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_owned())
        .filter(|v| !v.is_empty())
}
