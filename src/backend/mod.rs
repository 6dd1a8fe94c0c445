pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use log::{ info, warn };
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{ mpsc, Mutex };

use crate::cli::Args;
use crate::error::{ BackendError, ChatError };
use crate::models::chat::{ ChatMessage, ChatSession, NewChatMessage, NewChatSession };

pub const SESSIONS_TABLE: &str = "chat_sessions";
pub const MESSAGES_TABLE: &str = "chat_messages";

/// What a live-update channel watches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    AllSessions,
    SessionMessages(String),
}

impl Scope {
    pub fn table(&self) -> &'static str {
        match self {
            Scope::AllSessions => SESSIONS_TABLE,
            Scope::SessionMessages(_) => MESSAGES_TABLE,
        }
    }

    /// Row filter in PostgREST syntax, if the scope narrows the table.
    pub fn filter(&self) -> Option<String> {
        match self {
            Scope::AllSessions => None,
            Scope::SessionMessages(id) => Some(format!("session_id=eq.{}", id)),
        }
    }

    pub fn channel_name(&self) -> String {
        match self {
            Scope::AllSessions => "chat_sessions_changes".to_string(),
            Scope::SessionMessages(id) => format!("chat_messages_{}", id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_name())
    }
}

/// A row-level change reported by the backend. Only used as a signal; the
/// changed row itself is never applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: String,
}

pub type ChannelId = String;

pub struct ChangeStream {
    pub id: ChannelId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, BackendError>;

    async fn create_session(&self, session: &NewChatSession) -> Result<ChatSession, BackendError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, BackendError>;

    async fn insert_message(&self, message: &NewChatMessage) -> Result<ChatMessage, BackendError>;

    async fn subscribe(&self, scope: &Scope) -> Result<ChangeStream, BackendError>;

    async fn unsubscribe(&self, channel: &ChannelId) -> Result<(), BackendError>;

    async fn invoke_function(
        &self,
        name: &str,
        body: JsonValue
    ) -> Result<JsonValue, BackendError>;
}

/// Explicitly owned handle over the hosted backend. Cloning shares the
/// backend and the registry of open channels.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn ChatBackend>,
    channels: Arc<Mutex<HashMap<ChannelId, Scope>>>,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn backend(&self) -> &dyn ChatBackend {
        self.backend.as_ref()
    }

    pub async fn open(&self, scope: Scope) -> Result<ChangeStream, BackendError> {
        let stream = self.backend.subscribe(&scope).await?;
        info!("Opened live-update channel {} for {}", stream.id, scope);
        self.channels.lock().await.insert(stream.id.clone(), scope);
        Ok(stream)
    }

    pub async fn close(&self, channel: &ChannelId) {
        let scope = self.channels.lock().await.remove(channel);
        if scope.is_none() {
            return;
        }
        if let Err(e) = self.backend.unsubscribe(channel).await {
            warn!("Failed to close live-update channel {}: {}", channel, e);
        }
    }

    pub async fn close_all(&self) {
        let open: Vec<ChannelId> = self.channels.lock().await.drain().map(|(id, _)| id).collect();
        for channel in &open {
            if let Err(e) = self.backend.unsubscribe(channel).await {
                warn!("Failed to close live-update channel {}: {}", channel, e);
            }
        }
        if !open.is_empty() {
            info!("Closed {} live-update channel(s)", open.len());
        }
    }

    /// Scopes of every channel currently open through this handle.
    pub async fn open_scopes(&self) -> Vec<Scope> {
        self.channels.lock().await.values().cloned().collect()
    }
}

pub fn create_backend(args: &Args) -> Result<BackendHandle, ChatError> {
    match args.backend_type.to_lowercase().as_str() {
        "supabase" => {
            let url = args.supabase_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| ChatError::Config("SUPABASE_URL must be set".to_string()))?;
            let config = supabase::SupabaseConfig {
                url,
                anon_key: args.supabase_anon_key.clone(),
                access_token: args.supabase_access_token.clone(),
                request_timeout: args.request_timeout_secs.map(Duration::from_secs),
                heartbeat_interval: Duration::from_secs(args.realtime_heartbeat_secs),
            };
            let backend = supabase::SupabaseBackend::new(config).map_err(|e|
                ChatError::Config(e.to_string())
            )?;
            Ok(BackendHandle::new(Arc::new(backend)))
        }
        "memory" => Ok(BackendHandle::new(Arc::new(memory::MemoryBackend::new()))),
        other => Err(ChatError::Config(format!("Unsupported backend type: {}", other))),
    }
}
