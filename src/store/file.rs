use async_trait::async_trait;
use log::warn;
use serde_json::{ Map, Value as JsonValue };
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use tokio::fs;

use super::{ decode, encode, SessionStore, SESSION_KEY };
use crate::error::StoreError;
use crate::models::chat::ChatSession;

/// A JSON object on disk holding string values by key, the way a browser's
/// local storage does. The session lives under [`SESSION_KEY`].
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    async fn read_slots(&self) -> Result<Map<String, JsonValue>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Map::new());
            }
            Err(e) => {
                return Err(e.into());
            }
        };
        serde_json::from_str::<Map<String, JsonValue>>(&raw).map_err(|source| StoreError::Corrupt {
            key: SESSION_KEY.to_string(),
            source,
        })
    }

    /// Like `read_slots`, but an unreadable file counts as empty so the next
    /// write replaces it.
    async fn read_slots_for_write(&self) -> Result<Map<String, JsonValue>, StoreError> {
        match self.read_slots().await {
            Err(StoreError::Corrupt { .. }) => {
                warn!("Storage file {} is unreadable, replacing it", self.path.display());
                Ok(Map::new())
            }
            other => other,
        }
    }

    async fn write_slots(&self, slots: &Map<String, JsonValue>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(slots).map_err(StoreError::Serialize)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut slots = self.read_slots_for_write().await?;
        slots.insert(SESSION_KEY.to_string(), JsonValue::String(encode(session)?));
        self.write_slots(&slots).await
    }

    async fn load(&self) -> Result<Option<ChatSession>, StoreError> {
        let mut slots = match self.read_slots().await {
            Err(e @ StoreError::Corrupt { .. }) => {
                self.write_slots(&Map::new()).await?;
                return Err(e);
            }
            other => other?,
        };
        let raw = match slots.get(SESSION_KEY) {
            None => {
                return Ok(None);
            }
            Some(JsonValue::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
        };
        match decode(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                slots.remove(SESSION_KEY);
                self.write_slots(&slots).await?;
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut slots = match self.read_slots().await {
            Err(StoreError::Corrupt { .. }) => {
                return self.write_slots(&Map::new()).await;
            }
            other => other?,
        };
        if slots.remove(SESSION_KEY).is_some() {
            self.write_slots(&slots).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_session;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("live-support-{}", Uuid::new_v4())).join("storage.json")
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let path = temp_path();
        let store = FileSessionStore::new(&path);
        assert!(store.load().await.unwrap().is_none());

        let session = sample_session();
        store.save(&session).await.unwrap();

        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(session));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn other_keys_in_the_file_are_kept() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileSessionStore::new(&path);
        store.save(&sample_session()).await.unwrap();
        store.clear().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: JsonValue = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["theme"], "dark");
        assert!(value.get(SESSION_KEY).is_none());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn corrupt_session_is_cleared_from_disk() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"chatSession":"{\"id\": 42"}"#).unwrap();

        let store = FileSessionStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));
        assert!(store.load().await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn unreadable_storage_file_is_reported_then_reset() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileSessionStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));
        assert!(store.load().await.unwrap().is_none());

        store.save(&sample_session()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample_session()));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
