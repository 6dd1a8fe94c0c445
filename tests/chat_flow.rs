use std::sync::Arc;
use std::time::Duration;

use live_support::backend::memory::MemoryBackend;
use live_support::backend::{ BackendHandle, ChatBackend, Scope };
use live_support::chat::{
    AdminConsole,
    CustomerWidget,
    Invalidated,
    MessageFeed,
    WidgetView,
    DEFAULT_GREETING,
    DEFAULT_SENDER_NAME,
};
use live_support::error::ChatError;
use live_support::models::chat::{ ChatSession, NewChatSession, SenderType, SessionStatus };
use live_support::notify::{ FunctionNotifier, NOTIFICATION_FUNCTION };
use live_support::store::{ MemorySessionStore, SessionStore };

async fn create_session(memory: &MemoryBackend, name: &str) -> ChatSession {
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

fn admin_console(handle: &BackendHandle) -> AdminConsole {
    let notifier = Arc::new(FunctionNotifier::new(handle.clone(), NOTIFICATION_FUNCTION));
    AdminConsole::new(handle.clone(), notifier, DEFAULT_SENDER_NAME)
}

#[tokio::test]
async fn feed_is_ascending_and_grows_by_one_per_send() {
    let memory = Arc::new(MemoryBackend::new());
    let session = create_session(&memory, "Alex").await;
    let mut feed = MessageFeed::new(BackendHandle::new(memory.clone()));

    for (i, text) in ["first", "second", "third"].iter().enumerate() {
        feed.send(&session.id, text, SenderType::User).await.unwrap();
        feed.refresh(&session.id).await.unwrap();
        assert_eq!(feed.messages().len(), i + 1);
    }

    let contents: Vec<_> = feed.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    assert!(feed.messages().windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn intake_creates_one_active_session_with_greeting() {
    let memory = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemorySessionStore::new());
    let mut widget = CustomerWidget::new(BackendHandle::new(memory.clone()), store.clone(), DEFAULT_GREETING);

    widget.open_panel().await.unwrap();
    assert_eq!(widget.view(), WidgetView::IntakeForm);
    let started = widget.start_chat("Alex", "alex@example.com").await.unwrap();
    assert!(started.greeting_error.is_none());

    let sessions = memory.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_name, "Alex");
    assert_eq!(sessions[0].status, SessionStatus::Active);

    let messages = memory.all_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hello! How can we help you today?");
    assert_eq!(messages[0].sender_type, SenderType::Admin);

    assert_eq!(store.load().await.unwrap(), Some(started.session.clone()));
    match widget.view() {
        WidgetView::Feed(feed) => assert_eq!(feed.len(), 1),
        other => panic!("unexpected view {:?}", other),
    }
    widget.close().await;
}

#[tokio::test]
async fn blank_contact_details_never_reach_the_backend() {
    let memory = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemorySessionStore::new());
    let mut widget = CustomerWidget::new(BackendHandle::new(memory.clone()), store.clone(), DEFAULT_GREETING);

    for (name, email) in [("", "alex@example.com"), ("Alex", "   "), (" ", "")] {
        let err = widget.start_chat(name, email).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
    assert_eq!(memory.backend_calls(), 0);
    assert!(memory.sessions().is_empty());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn admin_reply_stores_message_and_notifies_once() {
    let memory = Arc::new(MemoryBackend::new());
    let session = create_session(&memory, "Alex").await;
    let handle = BackendHandle::new(memory.clone());
    let mut admin = admin_console(&handle);
    admin.open().await.unwrap();
    assert!(admin.messages().is_empty());

    let outcome = admin.reply("Hi there").await.unwrap().unwrap();
    assert!(outcome.notification.is_ok());
    assert_eq!(outcome.message.sender_type, SenderType::Admin);

    let stored = memory.list_messages(&session.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "Hi there");

    while admin.messages().is_empty() {
        let invalidated = tokio::time
            ::timeout(Duration::from_secs(2), admin.next_invalidation()).await
            .expect("no live update arrived")
            .unwrap();
        admin.handle(invalidated).await.unwrap();
    }
    assert_eq!(admin.messages().len(), 1);
    assert_eq!(admin.messages()[0].content, "Hi there");
    assert_eq!(admin.messages()[0].sender_type, SenderType::Admin);

    let calls = memory.function_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "send-chat-notification");
    assert_eq!(
        calls[0].1,
        serde_json::json!({
            "recipientEmail": "alex@example.com",
            "recipientName": "Alex",
            "senderName": "Mountain Mixology Support",
            "message": "Hi there",
        })
    );
    admin.close().await;
}

#[tokio::test]
async fn switching_sessions_keeps_one_message_channel() {
    let memory = Arc::new(MemoryBackend::new());
    let first = create_session(&memory, "Alex").await;
    let second = create_session(&memory, "Sam").await;
    let handle = BackendHandle::new(memory.clone());
    let mut admin = admin_console(&handle);
    admin.open().await.unwrap();
    assert_eq!(admin.selected().map(|s| s.id.as_str()), Some(second.id.as_str()));

    admin.select_session(first.clone()).await.unwrap();
    admin.select_session(second.clone()).await.unwrap();
    admin.select_session(first.clone()).await.unwrap();

    let scopes = handle.open_scopes().await;
    assert_eq!(scopes.len(), 2);
    assert!(scopes.contains(&Scope::AllSessions));
    assert!(scopes.contains(&Scope::SessionMessages(first.id.clone())));
    assert_eq!(memory.active_channels(), 2);

    admin.close().await;
    assert!(handle.open_scopes().await.is_empty());
    assert_eq!(memory.active_channels(), 0);
}

#[tokio::test]
async fn failed_refresh_keeps_the_previous_feed() {
    let memory = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemorySessionStore::new());
    let mut widget = CustomerWidget::new(BackendHandle::new(memory.clone()), store, DEFAULT_GREETING);
    let started = widget.start_chat("Alex", "alex@example.com").await.unwrap();
    let before = widget.messages().to_vec();
    assert_eq!(before.len(), 1);

    memory.set_fail_reads(true);
    let err = widget.handle(Invalidated(Scope::SessionMessages(started.session.id.clone()))).await.unwrap_err();
    assert!(matches!(err, ChatError::Fetch { .. }));
    assert_eq!(widget.messages(), before.as_slice());
    widget.close().await;
}

#[tokio::test]
async fn customer_message_reaches_the_admin_feed_live() {
    let memory = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemorySessionStore::new());
    let mut widget = CustomerWidget::new(BackendHandle::new(memory.clone()), store, DEFAULT_GREETING);
    widget.start_chat("Alex", "alex@example.com").await.unwrap();

    let mut admin = admin_console(&BackendHandle::new(memory.clone()));
    admin.open().await.unwrap();
    assert_eq!(admin.messages().len(), 1);

    widget.reply("I need help with my order").await.unwrap();

    while admin.messages().len() < 2 {
        let invalidated = tokio::time
            ::timeout(Duration::from_secs(2), admin.next_invalidation()).await
            .expect("no live update arrived")
            .unwrap();
        admin.handle(invalidated).await.unwrap();
    }
    let last = admin.messages().last().unwrap();
    assert_eq!(last.content, "I need help with my order");
    assert_eq!(last.sender_type, SenderType::User);

    admin.close().await;
    widget.close().await;
}
