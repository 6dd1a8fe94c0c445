use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Which view to run in the terminal (admin, widget)
    #[arg(long, env = "CHAT_MODE", default_value = "widget")]
    pub mode: String,

    // --- Backend Args ---
    /// Backend type (supabase, memory)
    #[arg(long, env = "BACKEND_TYPE", default_value = "supabase")]
    pub backend_type: String,

    /// Project URL of the hosted backend (e.g., https://xyz.supabase.co)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Public (anon) API key sent as `apikey` on every request
    #[arg(long, env = "SUPABASE_ANON_KEY", default_value = "")]
    pub supabase_anon_key: String,

    /// Signed-in user's access token. Falls back to the anon key if not set.
    #[arg(long, env = "SUPABASE_ACCESS_TOKEN")]
    pub supabase_access_token: Option<String>,

    /// Timeout in seconds for row and function requests. No timeout if not set.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Interval in seconds between realtime heartbeats.
    #[arg(long, env = "REALTIME_HEARTBEAT_SECS", default_value = "30")]
    pub realtime_heartbeat_secs: u64,

    // --- Session Store Args ---
    /// Where the visitor's chat session is kept between runs (file, redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "file")]
    pub store_type: String,

    /// Path of the key/value file used by the file store.
    #[arg(long, env = "STORE_PATH", default_value = ".live-support/storage.json")]
    pub store_path: String,

    /// Redis URL used by the redis store.
    #[arg(long, env = "STORE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub store_redis_url: String,

    /// Prefix for the redis session key.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "live-support:")]
    pub store_redis_prefix: String,

    /// Forget the stored chat session before starting.
    #[arg(long, env = "RESET_SESSION", default_value = "false")]
    pub reset_session: bool,

    // --- Chat Args ---
    /// First message posted as support when a visitor starts a chat.
    #[arg(long, env = "CHAT_GREETING", default_value = "Hello! How can we help you today?")]
    pub greeting: String,

    /// Sender name shown in reply notifications.
    #[arg(long, env = "SUPPORT_SENDER_NAME", default_value = "Mountain Mixology Support")]
    pub sender_name: String,

    /// Visitor name for the widget. Prompted for if not set.
    #[arg(long, env = "CHAT_USER_NAME")]
    pub user_name: Option<String>,

    /// Visitor email for the widget. Prompted for if not set.
    #[arg(long, env = "CHAT_USER_EMAIL")]
    pub user_email: Option<String>,

    // --- Notification Args ---
    /// How admin replies are announced to the customer (function, smtp, none)
    #[arg(long, env = "NOTIFIER_TYPE", default_value = "function")]
    pub notifier_type: String,

    /// Backend function invoked after each admin reply.
    #[arg(long, env = "NOTIFICATION_FUNCTION", default_value = "send-chat-notification")]
    pub notification_function: String,

    #[arg(long, env = "SMTP_EMAIL")]
    pub smtp_email: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    #[arg(long, env = "SMTP_SERVER", default_value = "smtp.gmail.com")]
    pub smtp_server: String,

    #[arg(long, env = "SMTP_PORT", default_value = "587")]
    pub smtp_port: u16,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_storefront() {
        let args = Args::parse_from(["live-support"]);
        assert_eq!(args.mode, "widget");
        assert_eq!(args.greeting, "Hello! How can we help you today?");
        assert_eq!(args.sender_name, "Mountain Mixology Support");
        assert_eq!(args.realtime_heartbeat_secs, 30);
        assert_eq!(args.request_timeout_secs, None);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "live-support",
            "--mode",
            "admin",
            "--backend-type",
            "memory",
            "--request-timeout-secs",
            "15",
        ]);
        assert_eq!(args.mode, "admin");
        assert_eq!(args.backend_type, "memory");
        assert_eq!(args.request_timeout_secs, Some(15));
    }
}
