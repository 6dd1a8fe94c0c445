use chrono::{ DateTime, Local, TimeZone, Utc };

use crate::models::chat::{ ChatMessage, ChatSession, SenderType };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The viewer's own messages sit on the right.
pub fn bubble_side(viewer: SenderType, message: &ChatMessage) -> Side {
    if message.sender_type == viewer { Side::Right } else { Side::Left }
}

/// `3:07 PM`
pub fn format_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
    where Tz::Offset: std::fmt::Display
{
    at.format("%-I:%M %p").to_string()
}

/// `Mar 1, 2024 3:07 PM`
pub fn format_date_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
    where Tz::Offset: std::fmt::Display
{
    at.format("%b %-d, %Y %-I:%M %p").to_string()
}

fn local(at: &DateTime<Utc>) -> DateTime<Local> {
    at.with_timezone(&Local)
}

pub fn message_line(viewer: SenderType, message: &ChatMessage) -> String {
    let time = format_time(&local(&message.created_at));
    match bubble_side(viewer, message) {
        Side::Right => format!("{:>60}  [{}]", message.content, time),
        Side::Left => format!("[{}]  {}", time, message.content),
    }
}

pub fn session_line(index: usize, session: &ChatSession, selected: bool) -> String {
    format!(
        "{} {:>2}. {} <{}>  {}",
        if selected { "*" } else { " " },
        index + 1,
        session.user_name,
        session.user_email,
        format_date_time(&local(&session.created_at))
    )
}
