use log::{ debug, error };

use crate::backend::BackendHandle;
use crate::error::ChatError;
use crate::models::chat::{ sort_feed, ChatMessage, NewChatMessage, SenderType };

/// In-memory copy of one session's messages, replaced wholesale on every
/// successful refresh.
pub struct MessageFeed {
    backend: BackendHandle,
    messages: Vec<ChatMessage>,
}

impl MessageFeed {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, messages: Vec::new() }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages of `session_id`, oldest first.
    pub async fn fetch(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = self.backend
            .backend()
            .list_messages(session_id).await
            .map_err(|e| ChatError::fetch("messages", e))?;
        sort_feed(&mut messages);
        Ok(messages)
    }

    /// Reconciles the local feed with the latest snapshot. On failure the
    /// previous feed is kept.
    pub async fn refresh(&mut self, session_id: &str) -> Result<usize, ChatError> {
        match self.fetch(session_id).await {
            Ok(messages) => {
                debug!("Feed for session {} now holds {} message(s)", session_id, messages.len());
                self.messages = messages;
                Ok(self.messages.len())
            }
            Err(e) => {
                error!("Error fetching messages for session {}: {}", session_id, e);
                Err(e)
            }
        }
    }

    /// Inserts one message. The local feed is left alone; it catches up on the
    /// next refresh. Blank content is ignored.
    pub async fn send(
        &self,
        session_id: &str,
        content: &str,
        sender_type: SenderType
    ) -> Result<Option<ChatMessage>, ChatError> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let message = NewChatMessage {
            session_id: session_id.to_string(),
            content: content.to_string(),
            sender_type,
        };
        let created = self.backend
            .backend()
            .insert_message(&message).await
            .map_err(|e| {
                error!("Error sending message to session {}: {}", session_id, e);
                ChatError::send("message", e)
            })?;
        Ok(Some(created))
    }
}
