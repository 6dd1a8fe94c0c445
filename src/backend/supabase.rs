use async_trait::async_trait;
use log::{ debug, info };
use reqwest::header::{ HeaderMap, HeaderValue, AUTHORIZATION };
use reqwest::{ Client as HttpClient, RequestBuilder, Response };
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ ChangeStream, ChannelId, ChatBackend, Scope, MESSAGES_TABLE, SESSIONS_TABLE };
use crate::error::BackendError;
use crate::models::chat::{ ChatMessage, ChatSession, NewChatMessage, NewChatSession };
use crate::realtime::{ websocket_url, RealtimeClient, SubscriberId };

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub request_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
}

/// Hosted backend: PostgREST for rows, Realtime for change notification,
/// Edge Functions for side effects.
pub struct SupabaseBackend {
    http: HttpClient,
    base_url: String,
    anon_key: String,
    heartbeat_interval: Duration,
    realtime: Mutex<Option<Arc<RealtimeClient>>>,
    channels: Mutex<HashMap<ChannelId, (Scope, SubscriberId)>>,
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key).map_err(|e|
            BackendError::Other(format!("Invalid API key header: {}", e))
        )?;
        let bearer = config.access_token.as_deref().unwrap_or(&config.anon_key);
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer)).map_err(|e|
            BackendError::Other(format!("Invalid authorization header: {}", e))
        )?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, auth);

        let mut builder = HttpClient::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key,
            heartbeat_interval: config.heartbeat_interval,
            realtime: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
        })
    }

    fn rest(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let resp = req.send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> Result<T, BackendError>
        where B: serde::Serialize + Sync, T: DeserializeOwned
    {
        let req = self.http
            .post(self.rest(table))
            .header("Prefer", "return=representation")
            .json(body);
        let mut rows: Vec<T> = self.execute(req).await?;
        if rows.len() != 1 {
            return Err(BackendError::Other(format!("{} insert returned {} rows", table, rows.len())));
        }
        Ok(rows.remove(0))
    }

    async fn realtime(&self) -> Result<Arc<RealtimeClient>, BackendError> {
        let mut guard = self.realtime.lock().await;
        if let Some(client) = guard.as_ref() {
            if client.is_alive() {
                return Ok(client.clone());
            }
            info!("Realtime socket is gone, reconnecting");
        }
        let url = websocket_url(&self.base_url, &self.anon_key)?;
        let client = Arc::new(RealtimeClient::connect(url, self.heartbeat_interval).await?);
        *guard = Some(client.clone());
        Ok(client)
    }
}

async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status: status.as_u16(), body })
}

#[async_trait]
impl ChatBackend for SupabaseBackend {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, BackendError> {
        let req = self.http
            .get(self.rest(SESSIONS_TABLE))
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        self.execute(req).await
    }

    async fn create_session(&self, session: &NewChatSession) -> Result<ChatSession, BackendError> {
        let created: ChatSession = self.insert_returning(SESSIONS_TABLE, session).await?;
        debug!("Created chat session {}", created.id);
        Ok(created)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        let filter = format!("eq.{}", session_id);
        let req = self.http
            .get(self.rest(MESSAGES_TABLE))
            .query(
                &[
                    ("select", "*"),
                    ("session_id", filter.as_str()),
                    ("order", "created_at.asc"),
                ]
            );
        self.execute(req).await
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<ChatMessage, BackendError> {
        self.insert_returning(MESSAGES_TABLE, message).await
    }

    async fn subscribe(&self, scope: &Scope) -> Result<ChangeStream, BackendError> {
        let client = self.realtime().await?;
        let joined = match client.join(scope).await {
            Ok(joined) => joined,
            Err(e @ BackendError::Unavailable(_)) => {
                // Socket is gone; the next subscribe reconnects.
                *self.realtime.lock().await = None;
                return Err(e);
            }
            Err(e) => {
                return Err(e);
            }
        };
        let id: ChannelId = Uuid::new_v4().to_string();
        self.channels.lock().await.insert(id.clone(), (scope.clone(), joined.subscriber));
        Ok(ChangeStream { id, events: joined.events })
    }

    async fn unsubscribe(&self, channel: &ChannelId) -> Result<(), BackendError> {
        let Some((scope, subscriber)) = self.channels.lock().await.remove(channel) else {
            return Ok(());
        };
        let client = self.realtime.lock().await.clone();
        if let Some(client) = client {
            if !client.is_alive() {
                return Ok(());
            }
            client.leave(&scope, subscriber).await?;
            if client.joined_topics().await == 0 && self.channels.lock().await.is_empty() {
                info!("No realtime topics left, closing socket");
                *self.realtime.lock().await = None;
            }
        }
        Ok(())
    }

    async fn invoke_function(
        &self,
        name: &str,
        body: JsonValue
    ) -> Result<JsonValue, BackendError> {
        let url = format!("{}/functions/v1/{}", self.base_url, name);
        let resp = self.http.post(&url).json(&body).send().await?;
        let resp = check_status(resp).await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(JsonValue::String(text)))
    }
}
