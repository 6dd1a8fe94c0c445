mod file;
mod redis;

pub use self::file::FileSessionStore;
pub use self::redis::RedisSessionStore;

use async_trait::async_trait;
use log::{ info, warn };
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cli::Args;
use crate::error::{ ChatError, StoreError };
use crate::models::chat::ChatSession;

/// Fixed key of the visitor's session slot.
pub const SESSION_KEY: &str = "chatSession";

/// Key/value slot persisting the visitor's chat session between runs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &ChatSession) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing is stored. Corrupt data is cleared and
    /// reported as [`StoreError::Corrupt`].
    async fn load(&self) -> Result<Option<ChatSession>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

pub(crate) fn encode(session: &ChatSession) -> Result<String, StoreError> {
    serde_json::to_string(session).map_err(StoreError::Serialize)
}

pub(crate) fn decode(raw: &str) -> Result<ChatSession, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: SESSION_KEY.to_string(),
        source,
    })
}

/// Process-local slot; nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes raw text into the slot, bypassing serialization.
    pub async fn put_raw(&self, raw: &str) {
        self.slots.lock().await.insert(SESSION_KEY.to_string(), raw.to_string());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &ChatSession) -> Result<(), StoreError> {
        let raw = encode(session)?;
        self.slots.lock().await.insert(SESSION_KEY.to_string(), raw);
        Ok(())
    }

    async fn load(&self) -> Result<Option<ChatSession>, StoreError> {
        let mut slots = self.slots.lock().await;
        let Some(raw) = slots.get(SESSION_KEY) else {
            return Ok(None);
        };
        match decode(raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                slots.remove(SESSION_KEY);
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.slots.lock().await.remove(SESSION_KEY);
        Ok(())
    }
}

pub fn create_session_store(args: &Args) -> Result<Arc<dyn SessionStore>, ChatError> {
    match args.store_type.to_lowercase().as_str() {
        "file" => {
            info!("Chat session will be stored in file {}", args.store_path);
            Ok(Arc::new(FileSessionStore::new(&args.store_path)))
        }
        "redis" => {
            info!("Chat session will be stored in redis at {}", args.store_redis_url);
            let store = RedisSessionStore::new(&args.store_redis_url, &args.store_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("Chat session is kept in memory only and will not survive a restart");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        other => Err(ChatError::Config(format!("Unsupported session store type: {}", other))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::chat::SessionStatus;
    use chrono::{ TimeZone, Utc };

    pub fn sample_session() -> ChatSession {
        ChatSession {
            id: "0b6f9a52-5d0f-4c1e-9f0e-6d7c1c2f9a11".into(),
            user_name: "Alex".into(),
            user_email: "alex@example.com".into(),
            status: SessionStatus::Active,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn load_after_save_returns_the_same_session() {
        let store = MemorySessionStore::new();
        assert!(store.load().await.unwrap().is_none());

        let session = sample_session();
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn corrupt_slot_is_reported_then_cleared() {
        let store = MemorySessionStore::new();
        store.put_raw("{not json").await;

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_overwrites_previous_session() {
        let store = MemorySessionStore::new();
        store.save(&sample_session()).await.unwrap();

        let mut other = sample_session();
        other.id = "second".into();
        store.save(&other).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().id, "second");
    }
}
