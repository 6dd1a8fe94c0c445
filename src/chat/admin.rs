use log::{ error, info, warn };
use std::sync::Arc;

use super::feed::MessageFeed;
use super::listener::{ Invalidated, LiveUpdateListener };
use crate::backend::{ BackendHandle, Scope };
use crate::error::ChatError;
use crate::models::chat::{ sort_sessions, ChatMessage, ChatSession, SenderType };
use crate::notify::{ ChatNotification, Notifier };

pub const DEFAULT_SENDER_NAME: &str = "Mountain Mixology Support";

/// A persisted admin reply plus the outcome of its e-mail side-channel.
#[derive(Debug)]
pub struct ReplyOutcome {
    pub message: ChatMessage,
    pub notification: Result<(), ChatError>,
}

/// Staff view: every session newest first, one selected session's feed, and
/// replies that also notify the customer by e-mail.
pub struct AdminConsole {
    backend: BackendHandle,
    notifier: Arc<dyn Notifier>,
    sender_name: String,
    sessions: Vec<ChatSession>,
    selected: Option<ChatSession>,
    feed: MessageFeed,
    listener: LiveUpdateListener,
    draft: String,
}

impl AdminConsole {
    pub fn new(backend: BackendHandle, notifier: Arc<dyn Notifier>, sender_name: impl Into<String>) -> Self {
        Self {
            feed: MessageFeed::new(backend.clone()),
            listener: LiveUpdateListener::new(backend.clone()),
            backend,
            notifier,
            sender_name: sender_name.into(),
            sessions: Vec::new(),
            selected: None,
            draft: String::new(),
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn selected(&self) -> Option<&ChatSession> {
        self.selected.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.feed.messages()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn listener(&self) -> &LiveUpdateListener {
        &self.listener
    }

    /// Mount: watch the session list and load it.
    pub async fn open(&mut self) -> Result<(), ChatError> {
        if let Err(e) = self.listener.subscribe(Scope::AllSessions).await {
            warn!("Session list will not update live: {}", e);
        }
        self.list_sessions().await.map(|_| ())
    }

    /// Unmount: release every channel this console holds.
    pub async fn close(&mut self) {
        self.listener.unsubscribe_all().await;
    }

    pub async fn list_sessions(&mut self) -> Result<&[ChatSession], ChatError> {
        let mut sessions = match self.backend.backend().list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Error fetching sessions: {}", e);
                return Err(ChatError::fetch("sessions", e));
            }
        };
        sort_sessions(&mut sessions);
        self.sessions = sessions;

        if self.selected.is_none() {
            if let Some(latest) = self.sessions.first().cloned() {
                if let Err(e) = self.select_session(latest).await {
                    warn!("Auto-selecting the latest session failed: {}", e);
                }
            }
        }
        Ok(&self.sessions)
    }

    /// Switches the feed to `session`. The previous session's channel is
    /// released before the new one is opened.
    pub async fn select_session(&mut self, session: ChatSession) -> Result<(), ChatError> {
        let same = self.selected.as_ref().map(|s| s.id == session.id).unwrap_or(false);
        if !same {
            if let Some(previous) = self.selected.take() {
                self.listener.unsubscribe(&Scope::SessionMessages(previous.id)).await;
            }
            self.feed.clear();
            info!("Selected chat session {} ({})", session.id, session.user_name);
        }
        let id = session.id.clone();
        self.selected = Some(session);

        self.listener.subscribe(Scope::SessionMessages(id.clone())).await?;
        self.feed.refresh(&id).await?;
        Ok(())
    }

    pub async fn select_by_index(&mut self, index: usize) -> Result<(), ChatError> {
        let session = self.sessions
            .get(index)
            .cloned()
            .ok_or_else(|| ChatError::Validation(format!("No session at position {}", index + 1)))?;
        self.select_session(session).await
    }

    /// Sends `content` as support to the selected session, then tries the
    /// e-mail side-channel. `Ok(None)` for blank content or no selection.
    pub async fn reply(&mut self, content: &str) -> Result<Option<ReplyOutcome>, ChatError> {
        self.draft = content.to_string();
        self.send_draft().await
    }

    /// Sends the current draft. The draft is cleared only once the message is
    /// stored, so a failed send can be retried as-is.
    pub async fn send_draft(&mut self) -> Result<Option<ReplyOutcome>, ChatError> {
        let Some(session) = self.selected.clone() else {
            return Ok(None);
        };
        let content = self.draft.clone();
        let Some(message) = self.feed.send(&session.id, &content, SenderType::Admin).await? else {
            return Ok(None);
        };
        self.draft.clear();

        let notification = ChatNotification {
            recipient_email: session.user_email.clone(),
            recipient_name: session.user_name.clone(),
            sender_name: self.sender_name.clone(),
            message: content,
        };
        let notification = self.notifier.notify(&notification).await.map_err(|e| {
            warn!("Error sending email notification for session {}: {}", session.id, e);
            ChatError::Notification(e)
        });

        Ok(Some(ReplyOutcome { message, notification }))
    }

    /// Waits for the next change on a watched scope.
    pub async fn next_invalidation(&mut self) -> Option<Invalidated> {
        self.listener.next().await
    }

    /// Re-fetches whatever `invalidated` names. Failures keep the stale copy.
    pub async fn handle(&mut self, invalidated: Invalidated) -> Result<(), ChatError> {
        match invalidated.0 {
            Scope::AllSessions => self.list_sessions().await.map(|_| ()),
            Scope::SessionMessages(id) => {
                let current = self.selected.as_ref().map(|s| s.id == id).unwrap_or(false);
                if !current {
                    return Ok(());
                }
                self.feed.refresh(&id).await.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::ChatBackend;
    use crate::models::chat::{ NewChatSession, SessionStatus };
    use crate::notify::FunctionNotifier;

    async fn create(memory: &MemoryBackend, name: &str) -> ChatSession {
        memory
            .create_session(
                &(NewChatSession {
                    user_name: name.into(),
                    user_email: format!("{}@example.com", name.to_lowercase()),
                    status: SessionStatus::Active,
                })
            ).await
            .unwrap()
    }

    fn console(memory: &Arc<MemoryBackend>) -> AdminConsole {
        let handle = BackendHandle::new(memory.clone());
        let notifier = Arc::new(FunctionNotifier::new(handle.clone(), "send-chat-notification"));
        AdminConsole::new(handle, notifier, DEFAULT_SENDER_NAME)
    }

    #[tokio::test]
    async fn open_lists_newest_first_and_selects_it() {
        let memory = Arc::new(MemoryBackend::new());
        create(&memory, "Alex").await;
        let newest = create(&memory, "Sam").await;

        let mut admin = console(&memory);
        admin.open().await.unwrap();

        let names: Vec<_> = admin.sessions().iter().map(|s| s.user_name.as_str()).collect();
        assert_eq!(names, vec!["Sam", "Alex"]);
        assert_eq!(admin.selected(), Some(&newest));
    }

    #[tokio::test]
    async fn reply_without_selection_does_nothing() {
        let memory = Arc::new(MemoryBackend::new());
        let mut admin = console(&memory);
        assert!(admin.reply("hello").await.unwrap().is_none());
        assert!(memory.function_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_send_preserves_draft_and_skips_notification() {
        let memory = Arc::new(MemoryBackend::new());
        create(&memory, "Alex").await;
        let mut admin = console(&memory);
        admin.open().await.unwrap();

        memory.set_fail_message_writes(true);
        let err = admin.reply("Hi there").await.unwrap_err();
        assert!(matches!(err, ChatError::Send { .. }));
        assert_eq!(admin.draft(), "Hi there");
        assert!(memory.function_calls().is_empty());

        memory.set_fail_message_writes(false);
        let outcome = admin.send_draft().await.unwrap().unwrap();
        assert_eq!(outcome.message.content, "Hi there");
        assert_eq!(admin.draft(), "");
    }

    #[tokio::test]
    async fn notification_failure_never_undoes_the_reply() {
        let memory = Arc::new(MemoryBackend::new());
        let session = create(&memory, "Alex").await;
        let mut admin = console(&memory);
        admin.open().await.unwrap();

        memory.set_fail_functions(true);
        let outcome = admin.reply("Hi there").await.unwrap().unwrap();
        assert!(matches!(outcome.notification, Err(ChatError::Notification(_))));

        let stored = memory.list_messages(&session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_type, SenderType::Admin);
    }

    #[tokio::test]
    async fn stale_message_invalidation_is_ignored() {
        let memory = Arc::new(MemoryBackend::new());
        let old = create(&memory, "Alex").await;
        create(&memory, "Sam").await;
        let mut admin = console(&memory);
        admin.open().await.unwrap();

        let calls = memory.backend_calls();
        admin.handle(Invalidated(Scope::SessionMessages(old.id))).await.unwrap();
        assert_eq!(memory.backend_calls(), calls);
    }
}
