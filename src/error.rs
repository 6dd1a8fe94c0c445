use thiserror::Error;

/// Failures talking to the hosted backend (rows, realtime, functions).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("realtime websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("realtime channel '{topic}' rejected: {reason}")]
    ChannelRejected {
        topic: String,
        reason: String,
    },

    #[error("malformed backend payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stored value under '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize session: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification function call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid mail address '{address}': {reason}")]
    Address {
        address: String,
        reason: String,
    },

    #[error("failed to build notification mail: {0}")]
    Mail(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// What a chat view reports back to its caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("failed to send {what}: {source}")]
    Send {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("{0}")]
    Validation(String),

    #[error("failed to send e-mail notification: {0}")]
    Notification(#[from] NotifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn fetch(what: &'static str, source: BackendError) -> Self {
        ChatError::Fetch { what, source }
    }

    pub fn send(what: &'static str, source: BackendError) -> Self {
        ChatError::Send { what, source }
    }

    /// Errors that leave the user's draft worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Send { .. })
    }
}
