use async_trait::async_trait;
use lettre::message::{ header, Mailbox, MultiPart, SinglePart };
use lettre::transport::smtp::authentication::Credentials;
use lettre::{ Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor };
use log::info;

use super::{ ChatNotification, Notifier };
use crate::cli::Args;
use crate::error::{ ChatError, NotifyError };

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub email: String,
    pub password: String,
    pub server: String,
    pub port: u16,
}

impl SmtpConfig {
    pub fn from_args(args: &Args) -> Result<Self, ChatError> {
        let email = args.smtp_email
            .clone()
            .ok_or_else(|| ChatError::Config("SMTP_EMAIL must be set".to_string()))?;
        let password = args.smtp_password
            .clone()
            .ok_or_else(|| ChatError::Config("SMTP_PASSWORD must be set".to_string()))?;
        Ok(Self {
            email,
            password,
            server: args.smtp_server.clone(),
            port: args.smtp_port,
        })
    }
}

/// Mails the customer directly instead of going through a backend function.
pub struct SmtpNotifier {
    from: Address,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_address(&config.email)?;
        let creds = Credentials::new(config.email.clone(), config.password);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>
            ::starttls_relay(&config.server)?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { from, mailer })
    }
}

fn parse_address(raw: &str) -> Result<Address, NotifyError> {
    raw.parse::<Address>().map_err(|e| NotifyError::Address {
        address: raw.to_string(),
        reason: e.to_string(),
    })
}

pub fn build_message(from: &Address, notification: &ChatNotification) -> Result<Message, NotifyError> {
    let to = Mailbox::new(
        Some(notification.recipient_name.clone()),
        parse_address(&notification.recipient_email)?
    );
    let html_body = format!(
        r#"<div style="font-family:Arial,sans-serif;max-width:500px;margin:0 auto">
    <p>Hello {},</p>
    <p>{} replied to your chat:</p>
    <blockquote style="border-left:3px solid #ccc;padding-left:12px">{}</blockquote>
</div>"#,
        escape_html(&notification.recipient_name),
        escape_html(&notification.sender_name),
        escape_html(&notification.message)
    );
    let text_body = format!(
        "Hello {},\n\n{} replied to your chat:\n\n{}\n",
        notification.recipient_name,
        notification.sender_name,
        notification.message
    );

    let message = Message::builder()
        .from(Mailbox::new(Some(notification.sender_name.clone()), from.clone()))
        .to(to)
        .subject(format!("New message from {}", notification.sender_name))
        .multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text_body))
                .singlepart(
                    SinglePart::builder().header(header::ContentType::TEXT_HTML).body(html_body)
                )
        )?;
    Ok(message)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &ChatNotification) -> Result<(), NotifyError> {
        let message = build_message(&self.from, notification)?;
        self.mailer.send(message).await?;
        info!("Chat notification mailed to {}", notification.recipient_email);
        Ok(())
    }
}
