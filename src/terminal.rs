//! Line-oriented terminal front end for both chat views.

use log::{ error, warn };
use std::error::Error;
use tokio::io::{ AsyncBufReadExt, BufReader, Stdin };
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::chat::{ AdminConsole, CustomerWidget, WidgetView };
use crate::error::ChatError;
use crate::models::chat::SenderType;
use crate::render::{ message_line, session_line };

type Lines = LinesStream<BufReader<Stdin>>;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    List,
    Select(usize),
    Retry,
    Say(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };
        let mut parts = rest.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("quit" | "exit" | "q"), _) => Command::Quit,
            (Some("list"), _) => Command::List,
            (Some("retry"), _) => Command::Retry,
            (Some("select"), Some(n)) =>
                match n.parse::<usize>() {
                    Ok(n) if n > 0 => Command::Select(n - 1),
                    _ => Command::Unknown(trimmed.to_string()),
                }
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

fn stdin_lines() -> Lines {
    LinesStream::new(BufReader::new(tokio::io::stdin()).lines())
}

fn print_admin(console: &AdminConsole) {
    println!("--- Sessions ---");
    let selected = console.selected().map(|s| s.id.as_str());
    for (i, session) in console.sessions().iter().enumerate() {
        println!("{}", session_line(i, session, Some(session.id.as_str()) == selected));
    }
    if let Some(session) = console.selected() {
        println!("--- {} <{}> ---", session.user_name, session.user_email);
        for message in console.messages() {
            println!("{}", message_line(SenderType::Admin, message));
        }
    }
}

fn print_widget(widget: &CustomerWidget) {
    if let WidgetView::Feed(messages) = widget.view() {
        println!("--- Chat Support ---");
        for message in messages {
            println!("{}", message_line(SenderType::User, message));
        }
    }
}

fn report(err: &ChatError) {
    match err {
        ChatError::Validation(msg) => println!("! {}", msg),
        ChatError::Send { .. } => println!("! Failed to send message. Please try again (/retry)."),
        ChatError::Notification(_) => println!("! Failed to send email notification."),
        other => println!("! {}", other),
    }
}

pub async fn run_admin(mut console: AdminConsole) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Err(e) = console.open().await {
        error!("Admin console opened without sessions: {}", e);
    }
    print_admin(&console);
    println!("Commands: /list, /select <n>, /retry, /quit. Anything else is sent as a reply.");

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.next() => {
                let Some(line) = line else { break; };
                match Command::parse(&line?) {
                    Command::Quit => break,
                    Command::List => {
                        if let Err(e) = console.list_sessions().await {
                            report(&e);
                        }
                        print_admin(&console);
                    }
                    Command::Select(index) => {
                        match console.select_by_index(index).await {
                            Ok(()) => print_admin(&console),
                            Err(e) => report(&e),
                        }
                    }
                    Command::Retry => {
                        match console.send_draft().await {
                            Ok(Some(outcome)) => {
                                if let Err(e) = outcome.notification {
                                    report(&e);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => report(&e),
                        }
                    }
                    Command::Say(text) => {
                        match console.reply(&text).await {
                            Ok(Some(outcome)) => {
                                if let Err(e) = outcome.notification {
                                    report(&e);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => report(&e),
                        }
                    }
                    Command::Unknown(cmd) => println!("! Unknown command {}", cmd),
                }
            }
            Some(invalidated) = console.next_invalidation() => {
                if console.handle(invalidated).await.is_ok() {
                    print_admin(&console);
                }
            }
        }
    }

    console.close().await;
    Ok(())
}

async fn prompt(lines: &mut Lines, label: &str) -> Result<Option<String>, std::io::Error> {
    println!("{}:", label);
    match lines.next().await {
        Some(line) => Ok(Some(line?)),
        None => Ok(None),
    }
}

pub async fn run_widget(
    mut widget: CustomerWidget,
    user_name: Option<String>,
    user_email: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    widget.open_panel().await?;
    let mut lines = stdin_lines();

    let mut preset = user_name.zip(user_email);
    while widget.view() == WidgetView::IntakeForm {
        let (name, email) = match preset.take() {
            Some(contact) => contact,
            None => {
                let Some(name) = prompt(&mut lines, "Your Name").await? else {
                    return Ok(());
                };
                let Some(email) = prompt(&mut lines, "Your Email").await? else {
                    return Ok(());
                };
                (name, email)
            }
        };
        println!("Starting chat...");
        match widget.start_chat(&name, &email).await {
            Ok(started) => {
                if let Some(e) = started.greeting_error {
                    warn!("Chat started without greeting: {}", e);
                }
            }
            Err(e) => report(&e),
        }
    }
    print_widget(&widget);

    loop {
        tokio::select! {
            line = lines.next() => {
                let Some(line) = line else { break; };
                match Command::parse(&line?) {
                    Command::Quit => break,
                    Command::Retry => {
                        if let Err(e) = widget.send_draft().await {
                            report(&e);
                        }
                    }
                    Command::Say(text) => {
                        if let Err(e) = widget.reply(&text).await {
                            report(&e);
                        }
                    }
                    _ => println!("! Commands: /retry, /quit"),
                }
            }
            Some(invalidated) = widget.next_invalidation() => {
                if widget.handle(invalidated).await.is_ok() {
                    print_widget(&widget);
                }
            }
        }
    }

    widget.close_panel();
    widget.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_plain_text() {
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse(" /select 2 "), Command::Select(1));
        assert_eq!(Command::parse("/select 0"), Command::Unknown("/select 0".into()));
        assert_eq!(Command::parse("/retry"), Command::Retry);
        assert_eq!(Command::parse("Hi there"), Command::Say("Hi there".into()));
        assert_eq!(Command::parse("/dance"), Command::Unknown("/dance".into()));
    }
}
