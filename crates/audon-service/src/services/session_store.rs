//! HTTP session data written by the login flow.
//!
//! Sessions live in Redis under `session_<id>` as a JSON document
//! (`SessionData`). This service only reads them.

use crate::errors::AudonError;
use crate::models::SessionData;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{instrument, warn};

const SESSION_KEY_PREFIX: &str = "session_";

/// Upper bound on accepted session ids; longer ids are never issued.
const MAX_SESSION_ID_LEN: usize = 256;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Unknown or unreadable sessions yield `None`.
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, AudonError>;
}

fn session_key(session_id: &str) -> Option<String> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    valid.then(|| format!("{SESSION_KEY_PREFIX}{session_id}"))
}

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `AudonError::Database` if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, AudonError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all)]
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, AudonError> {
        let Some(key) = session_key(session_id) else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;

        Ok(raw.and_then(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| {
                    warn!(target: "audon.services.session_store", error = %e, "Discarding unreadable session");
                })
                .ok()
        }))
    }
}

pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockSessionStore {
        sessions: Mutex<HashMap<String, SessionData>>,
    }

    impl MockSessionStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, session_id: &str, data: SessionData) {
            self.sessions
                .lock()
                .await
                .insert(session_id.to_string(), data);
        }
    }

    #[async_trait]
    impl SessionStore for MockSessionStore {
        async fn load(&self, session_id: &str) -> Result<Option<SessionData>, AudonError> {
            if session_key(session_id).is_none() {
                return Ok(None);
            }
            Ok(self.sessions.lock().await.get(session_id).cloned())
        }
    }
}
