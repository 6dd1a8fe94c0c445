use log::{ error, info, warn };
use std::sync::Arc;

use crate::backend::BackendHandle;
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, ChatSession, NewChatMessage, NewChatSession, SenderType, SessionStatus };
use crate::store::SessionStore;

pub const DEFAULT_GREETING: &str = "Hello! How can we help you today?";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatState {
    NoSession,
    Active(ChatSession),
}

/// Result of a successful intake. A failed greeting does not undo the session.
#[derive(Debug)]
pub struct StartedChat {
    pub session: ChatSession,
    pub greeting: Option<ChatMessage>,
    pub greeting_error: Option<ChatError>,
}

/// Trims both fields and rejects empty ones before anything touches the
/// network. The trimmed values are the ones stored on the session.
pub fn validate_contact(name: &str, email: &str) -> Result<(String, String), ChatError> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(
            ChatError::Validation(
                "Please provide your name and email to start chatting.".to_string()
            )
        );
    }
    Ok((name.to_string(), email.to_string()))
}

pub struct ChatLifecycle {
    backend: BackendHandle,
    store: Arc<dyn SessionStore>,
    greeting: String,
    state: ChatState,
}

impl ChatLifecycle {
    pub fn new(backend: BackendHandle, store: Arc<dyn SessionStore>, greeting: impl Into<String>) -> Self {
        Self {
            backend,
            store,
            greeting: greeting.into(),
            state: ChatState::NoSession,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn session(&self) -> Option<&ChatSession> {
        match &self.state {
            ChatState::Active(session) => Some(session),
            ChatState::NoSession => None,
        }
    }

    /// Picks up a session saved by an earlier run. Corrupt data has already
    /// been cleared by the store and is returned as an error.
    pub async fn resume(&mut self) -> Result<Option<&ChatSession>, ChatError> {
        if let ChatState::NoSession = self.state {
            if let Some(session) = self.store.load().await? {
                info!("Resuming chat session {} for {}", session.id, session.user_email);
                self.state = ChatState::Active(session);
            }
        }
        Ok(self.session())
    }

    /// `no-session -> active`: create the session, persist it locally, then
    /// post the greeting as support.
    pub async fn start(&mut self, name: &str, email: &str) -> Result<StartedChat, ChatError> {
        let (user_name, user_email) = validate_contact(name, email)?;
        if let ChatState::Active(session) = &self.state {
            return Err(ChatError::Validation(format!("Chat session {} is already active", session.id)));
        }

        let new_session = NewChatSession {
            user_name,
            user_email,
            status: SessionStatus::Active,
        };
        let session = self.backend
            .backend()
            .create_session(&new_session).await
            .map_err(|e| {
                error!("Error starting chat: {}", e);
                ChatError::send("chat session", e)
            })?;
        info!("Started chat session {} for {}", session.id, session.user_email);
        self.state = ChatState::Active(session.clone());

        if let Err(e) = self.store.save(&session).await {
            warn!("Chat session {} could not be saved locally: {}", session.id, e);
        }

        let greeting = NewChatMessage {
            session_id: session.id.clone(),
            content: self.greeting.clone(),
            sender_type: SenderType::Admin,
        };
        let (greeting, greeting_error) = match self.backend.backend().insert_message(&greeting).await {
            Ok(message) => (Some(message), None),
            Err(e) => {
                warn!("Greeting for chat session {} was not posted: {}", session.id, e);
                (None, Some(ChatError::send("greeting", e)))
            }
        };

        Ok(StartedChat { session, greeting, greeting_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::store::MemorySessionStore;

    fn lifecycle(memory: &Arc<MemoryBackend>, store: &Arc<MemorySessionStore>) -> ChatLifecycle {
        ChatLifecycle::new(BackendHandle::new(memory.clone()), store.clone(), DEFAULT_GREETING)
    }

    #[tokio::test]
    async fn empty_fields_short_circuit() {
        let memory = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemorySessionStore::new());
        let mut chat = lifecycle(&memory, &store);

        for (name, email) in [("", "alex@example.com"), ("Alex", ""), ("  ", "\t")] {
            let err = chat.start(name, email).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }
        assert_eq!(memory.backend_calls(), 0);
        assert!(memory.sessions().is_empty());
        assert_eq!(*chat.state(), ChatState::NoSession);
    }

    #[tokio::test]
    async fn failed_create_stays_in_no_session() {
        let memory = Arc::new(MemoryBackend::new());
        memory.set_fail_session_writes(true);
        let store = Arc::new(MemorySessionStore::new());
        let mut chat = lifecycle(&memory, &store);

        let err = chat.start("Alex", "alex@example.com").await.unwrap_err();
        assert!(matches!(err, ChatError::Send { .. }));
        assert_eq!(*chat.state(), ChatState::NoSession);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_greeting_leaves_session_active() {
        let memory = Arc::new(MemoryBackend::new());
        memory.set_fail_message_writes(true);
        let store = Arc::new(MemorySessionStore::new());
        let mut chat = lifecycle(&memory, &store);

        let started = chat.start("Alex", "alex@example.com").await.unwrap();
        assert!(started.greeting.is_none());
        assert!(started.greeting_error.is_some());
        assert_eq!(chat.session(), Some(&started.session));
        assert_eq!(store.load().await.unwrap(), Some(started.session));
        assert!(memory.all_messages().is_empty());
    }

    #[tokio::test]
    async fn resume_reads_the_saved_session() {
        let memory = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemorySessionStore::new());
        let started = lifecycle(&memory, &store).start("Alex", "alex@example.com").await.unwrap();

        let mut reopened = lifecycle(&memory, &store);
        let resumed = reopened.resume().await.unwrap().cloned();
        assert_eq!(resumed, Some(started.session));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let memory = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemorySessionStore::new());
        let mut chat = lifecycle(&memory, &store);
        chat.start("Alex", "alex@example.com").await.unwrap();

        let err = chat.start("Sam", "sam@example.com").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(memory.sessions().len(), 1);
    }

    #[tokio::test]
    async fn contact_details_are_stored_trimmed() {
        let memory = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemorySessionStore::new());
        let mut chat = lifecycle(&memory, &store);

        let started = chat.start("  Alex ", " alex@example.com\n").await.unwrap();
        assert_eq!(started.session.user_name, "Alex");
        assert_eq!(started.session.user_email, "alex@example.com");
        assert_eq!(memory.sessions()[0].user_email, "alex@example.com");
    }
}
