mod smtp;

pub use self::smtp::{ SmtpConfig, SmtpNotifier };

use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use std::sync::Arc;

use crate::backend::BackendHandle;
use crate::cli::Args;
use crate::error::{ ChatError, NotifyError };

pub const NOTIFICATION_FUNCTION: &str = "send-chat-notification";

/// Body of the out-of-band alert sent after an admin reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNotification {
    pub recipient_email: String,
    pub recipient_name: String,
    pub sender_name: String,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &ChatNotification) -> Result<(), NotifyError>;
}

/// Invokes the backend's notification function.
pub struct FunctionNotifier {
    backend: BackendHandle,
    function: String,
}

impl FunctionNotifier {
    pub fn new(backend: BackendHandle, function: impl Into<String>) -> Self {
        Self { backend, function: function.into() }
    }
}

#[async_trait]
impl Notifier for FunctionNotifier {
    async fn notify(&self, notification: &ChatNotification) -> Result<(), NotifyError> {
        let body = serde_json::to_value(notification).map_err(|e| NotifyError::Backend(e.into()))?;
        self.backend.backend().invoke_function(&self.function, body).await?;
        Ok(())
    }
}

pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, _notification: &ChatNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

pub fn create_notifier(args: &Args, backend: &BackendHandle) -> Result<Arc<dyn Notifier>, ChatError> {
    match args.notifier_type.to_lowercase().as_str() {
        "function" => {
            info!("Admin replies will invoke backend function '{}'", args.notification_function);
            Ok(Arc::new(FunctionNotifier::new(backend.clone(), args.notification_function.clone())))
        }
        "smtp" => {
            let config = SmtpConfig::from_args(args)?;
            info!("Admin replies will be mailed through {}:{}", config.server, config.port);
            Ok(Arc::new(SmtpNotifier::new(config)?))
        }
        "none" | "disabled" => Ok(Arc::new(DisabledNotifier)),
        other => Err(ChatError::Config(format!("Unsupported notifier type: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn notification() -> ChatNotification {
        ChatNotification {
            recipient_email: "alex@example.com".into(),
            recipient_name: "Alex".into(),
            sender_name: "Mountain Mixology Support".into(),
            message: "Hi there".into(),
        }
    }

    #[test]
    fn body_uses_camel_case_fields() {
        let value = serde_json::to_value(notification()).unwrap();
        assert_eq!(value["recipientEmail"], "alex@example.com");
        assert_eq!(value["recipientName"], "Alex");
        assert_eq!(value["senderName"], "Mountain Mixology Support");
        assert_eq!(value["message"], "Hi there");
    }

    #[tokio::test]
    async fn function_notifier_invokes_named_function() {
        let memory = Arc::new(MemoryBackend::new());
        let notifier = FunctionNotifier::new(BackendHandle::new(memory.clone()), NOTIFICATION_FUNCTION);

        notifier.notify(&notification()).await.unwrap();

        let calls = memory.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "send-chat-notification");
        assert_eq!(calls[0].1["message"], "Hi there");
    }

    #[tokio::test]
    async fn function_failure_is_a_notify_error() {
        let memory = Arc::new(MemoryBackend::new());
        memory.set_fail_functions(true);
        let notifier = FunctionNotifier::new(BackendHandle::new(memory), NOTIFICATION_FUNCTION);

        let err = notifier.notify(&notification()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Backend(_)));
    }
}
