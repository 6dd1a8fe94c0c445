use async_trait::async_trait;
use redis::{ AsyncCommands, Client };

use super::{ decode, encode, SessionStore, SESSION_KEY };
use crate::error::StoreError;
use crate::models::chat::ChatSession;

pub struct RedisSessionStore {
    client: Client,
    key: String,
}

impl RedisSessionStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            key: format!("{}{}", key_prefix, SESSION_KEY),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let json = encode(session)?;
        conn.set::<_, _, ()>(&self.key, json).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<ChatSession>, StoreError> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.get(&self.key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match decode(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                conn.del::<_, ()>(&self.key).await?;
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}
