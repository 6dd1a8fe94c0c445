use log::{ info, warn };
use std::sync::Arc;

use super::feed::MessageFeed;
use super::lifecycle::{ ChatLifecycle, StartedChat };
use super::listener::{ Invalidated, LiveUpdateListener };
use crate::backend::{ BackendHandle, Scope };
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, ChatSession, SenderType };
use crate::store::SessionStore;

#[derive(Debug, PartialEq, Eq)]
pub enum WidgetView<'a> {
    Collapsed,
    IntakeForm,
    Feed(&'a [ChatMessage]),
}

/// Floating customer panel bound to at most one session.
pub struct CustomerWidget {
    lifecycle: ChatLifecycle,
    feed: MessageFeed,
    listener: LiveUpdateListener,
    open: bool,
    draft: String,
}

impl CustomerWidget {
    pub fn new(backend: BackendHandle, store: Arc<dyn SessionStore>, greeting: impl Into<String>) -> Self {
        Self {
            lifecycle: ChatLifecycle::new(backend.clone(), store, greeting),
            feed: MessageFeed::new(backend.clone()),
            listener: LiveUpdateListener::new(backend),
            open: false,
            draft: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.lifecycle.session()
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

    pub fn view(&self) -> WidgetView<'_> {
        if !self.open {
            return WidgetView::Collapsed;
        }
        match self.lifecycle.session() {
            None => WidgetView::IntakeForm,
            Some(_) => WidgetView::Feed(self.feed.messages()),
        }
    }

    /// Expands the panel. The first time, a session saved by an earlier run
    /// is resumed together with its feed.
    pub async fn open_panel(&mut self) -> Result<(), ChatError> {
        self.open = true;
        if self.lifecycle.session().is_some() {
            return Ok(());
        }
        let resumed = match self.lifecycle.resume().await {
            Ok(session) => session.cloned(),
            Err(e) => {
                warn!("Stored chat session could not be read, starting fresh: {}", e);
                None
            }
        };
        if let Some(session) = resumed {
            self.attach(&session.id).await;
        }
        Ok(())
    }

    pub fn close_panel(&mut self) {
        self.open = false;
    }

    pub async fn start_chat(&mut self, name: &str, email: &str) -> Result<StartedChat, ChatError> {
        let started = self.lifecycle.start(name, email).await?;
        self.attach(&started.session.id).await;
        Ok(started)
    }

    async fn attach(&mut self, session_id: &str) {
        if let Err(e) = self.listener.subscribe(Scope::SessionMessages(session_id.to_string())).await {
            warn!("Chat session {} will not update live: {}", session_id, e);
        }
        if self.feed.refresh(session_id).await.is_ok() {
            info!("Loaded {} message(s) for session {}", self.feed.messages().len(), session_id);
        }
    }

    /// Sends `content` as the customer. `Ok(None)` for blank content or when
    /// no chat has been started.
    pub async fn reply(&mut self, content: &str) -> Result<Option<ChatMessage>, ChatError> {
        self.draft = content.to_string();
        self.send_draft().await
    }

    pub async fn send_draft(&mut self) -> Result<Option<ChatMessage>, ChatError> {
        let Some(session_id) = self.lifecycle.session().map(|s| s.id.clone()) else {
            return Ok(None);
        };
        let sent = self.feed.send(&session_id, &self.draft, SenderType::User).await?;
        if sent.is_some() {
            self.draft.clear();
        }
        Ok(sent)
    }

    pub async fn next_invalidation(&mut self) -> Option<Invalidated> {
        self.listener.next().await
    }

    pub async fn handle(&mut self, invalidated: Invalidated) -> Result<(), ChatError> {
        let Scope::SessionMessages(id) = invalidated.0 else {
            return Ok(());
        };
        let current = self.lifecycle.session().map(|s| s.id == id).unwrap_or(false);
        if !current {
            return Ok(());
        }
        self.feed.refresh(&id).await.map(|_| ())
    }

    pub async fn close(&mut self) {
        self.listener.unsubscribe_all().await;
    }
}
