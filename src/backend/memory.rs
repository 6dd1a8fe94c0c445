use async_trait::async_trait;
use chrono::{ DateTime, Duration as ChronoDuration, Utc };
use log::debug;
use serde_json::{ json, Value as JsonValue };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::{ Mutex, MutexGuard };
use tokio::sync::{ broadcast, mpsc };
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ ChangeEvent, ChangeStream, ChannelId, ChatBackend, Scope, MESSAGES_TABLE, SESSIONS_TABLE };
use crate::error::BackendError;
use crate::models::chat::{
    sort_feed,
    sort_sessions,
    ChatMessage,
    ChatSession,
    NewChatMessage,
    NewChatSession,
};

const CHANGE_BUFFER: usize = 256;
const CHANNEL_BUFFER: usize = 64;

#[derive(Clone, Debug)]
struct RowChange {
    table: &'static str,
    kind: &'static str,
    session_id: Option<String>,
}

impl RowChange {
    fn matches(&self, scope: &Scope) -> bool {
        match scope {
            Scope::AllSessions => self.table == SESSIONS_TABLE,
            Scope::SessionMessages(id) =>
                self.table == MESSAGES_TABLE && self.session_id.as_deref() == Some(id.as_str()),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    sessions: Vec<ChatSession>,
    messages: Vec<ChatMessage>,
    channels: HashMap<ChannelId, JoinHandle<()>>,
    function_calls: Vec<(String, JsonValue)>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Server-assigned creation time, strictly increasing.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

#[derive(Default)]
struct Faults {
    reads: AtomicBool,
    session_writes: AtomicBool,
    message_writes: AtomicBool,
    functions: AtomicBool,
}

/// In-process stand-in for the hosted backend. Keeps both tables in memory,
/// fans row changes out to subscribed channels, and can be told to fail.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<RowChange>,
    faults: Faults,
    calls: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Mutex::new(MemoryState::default()),
            changes,
            faults: Faults::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn publish(&self, change: RowChange) {
        // No receivers just means nobody is listening.
        let _ = self.changes.send(change);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_session_writes(&self, fail: bool) {
        self.faults.session_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_message_writes(&self, fail: bool) {
        self.faults.message_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_functions(&self, fail: bool) {
        self.faults.functions.store(fail, Ordering::SeqCst);
    }

    /// Number of backend operations issued so far, of any kind.
    pub fn backend_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active_channels(&self) -> usize {
        self.state().channels.len()
    }

    /// Ends every open change stream, as a dropped realtime socket would.
    pub fn drop_channels(&self) {
        for (_, task) in self.state().channels.drain() {
            task.abort();
        }
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.state().sessions.clone()
    }

    pub fn all_messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    pub fn function_calls(&self) -> Vec<(String, JsonValue)> {
        self.state().function_calls.clone()
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, BackendError> {
        self.record_call();
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("chat_sessions read failed".to_string()));
        }
        let mut sessions = self.state().sessions.clone();
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    async fn create_session(&self, session: &NewChatSession) -> Result<ChatSession, BackendError> {
        self.record_call();
        if self.faults.session_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "chat_sessions insert rejected".to_string(),
            });
        }
        let created = {
            let mut state = self.state();
            let created = ChatSession {
                id: Uuid::new_v4().to_string(),
                user_name: session.user_name.clone(),
                user_email: session.user_email.clone(),
                status: session.status,
                created_at: state.next_timestamp(),
            };
            state.sessions.push(created.clone());
            created
        };
        self.publish(RowChange {
            table: SESSIONS_TABLE,
            kind: "INSERT",
            session_id: Some(created.id.clone()),
        });
        Ok(created)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        self.record_call();
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("chat_messages read failed".to_string()));
        }
        let mut messages: Vec<ChatMessage> = self
            .state()
            .messages.iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        sort_feed(&mut messages);
        Ok(messages)
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<ChatMessage, BackendError> {
        self.record_call();
        if self.faults.message_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "chat_messages insert rejected".to_string(),
            });
        }
        let created = {
            let mut state = self.state();
            if !state.sessions.iter().any(|s| s.id == message.session_id) {
                return Err(BackendError::Status {
                    status: 409,
                    body: format!("session {} does not exist", message.session_id),
                });
            }
            let created = ChatMessage {
                id: Uuid::new_v4().to_string(),
                session_id: message.session_id.clone(),
                content: message.content.clone(),
                sender_type: message.sender_type,
                created_at: state.next_timestamp(),
            };
            state.messages.push(created.clone());
            created
        };
        self.publish(RowChange {
            table: MESSAGES_TABLE,
            kind: "INSERT",
            session_id: Some(created.session_id.clone()),
        });
        Ok(created)
    }

    async fn subscribe(&self, scope: &Scope) -> Result<ChangeStream, BackendError> {
        self.record_call();
        let id: ChannelId = Uuid::new_v4().to_string();
        let (tx, events) = mpsc::channel(CHANNEL_BUFFER);
        let mut rx = self.changes.subscribe();
        let scope = scope.clone();
        let channel = id.clone();

        let task = tokio::spawn(async move {
            loop {
                let change = match rx.recv().await {
                    Ok(change) if change.matches(&scope) => change,
                    Ok(_) => {
                        continue;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Channel {} lagged by {} change(s)", channel, skipped);
                        RowChange { table: scope.table(), kind: "*", session_id: None }
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                };
                let event = ChangeEvent {
                    table: change.table.to_string(),
                    kind: change.kind.to_string(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        self.state().channels.insert(id.clone(), task);
        Ok(ChangeStream { id, events })
    }

    async fn unsubscribe(&self, channel: &ChannelId) -> Result<(), BackendError> {
        self.record_call();
        if let Some(task) = self.state().channels.remove(channel) {
            task.abort();
        }
        Ok(())
    }

    async fn invoke_function(
        &self,
        name: &str,
        body: JsonValue
    ) -> Result<JsonValue, BackendError> {
        self.record_call();
        if self.faults.functions.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                body: format!("function {} failed", name),
            });
        }
        self.state().function_calls.push((name.to_string(), body));
        Ok(json!({ "success": true }))
    }
}
