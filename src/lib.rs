pub mod backend;
pub mod chat;
pub mod cli;
pub mod error;
pub mod models;
pub mod notify;
pub mod realtime;
pub mod render;
pub mod store;
pub mod terminal;

use backend::create_backend;
use chat::{ AdminConsole, CustomerWidget };
use cli::Args;
use error::ChatError;
use log::{ info, warn };
use notify::create_notifier;
use std::error::Error;
use store::create_session_store;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Mode: {}", args.mode);
    info!("Backend Type: {}", args.backend_type);
    if let Some(url) = &args.supabase_url {
        info!("Backend URL: {}", url);
    }
    info!("Request Timeout: {}", match args.request_timeout_secs {
        Some(secs) => format!("{}s", secs),
        None => "none".to_string(),
    });
    info!("Realtime Heartbeat: {}s", args.realtime_heartbeat_secs);
    info!("Session Store Type: {}", args.store_type);
    info!("Notifier Type: {}", args.notifier_type);
    info!("Sender Name: {}", args.sender_name);
    info!("-------------------------");

    let backend = create_backend(&args)?;

    let result = match args.mode.to_lowercase().as_str() {
        "admin" => {
            let notifier = create_notifier(&args, &backend)?;
            let console = AdminConsole::new(backend.clone(), notifier, args.sender_name.clone());
            terminal::run_admin(console).await
        }
        "widget" => {
            let store = create_session_store(&args)?;
            if args.reset_session {
                warn!("Forgetting the stored chat session");
                store.clear().await.map_err(ChatError::from)?;
            }
            let widget = CustomerWidget::new(backend.clone(), store, args.greeting.clone());
            terminal::run_widget(widget, args.user_name.clone(), args.user_email.clone()).await
        }
        other => Err(ChatError::Config(format!("Unsupported mode: {}", other)).into()),
    };

    backend.close_all().await;
    info!("Live support stopped");
    result
}
