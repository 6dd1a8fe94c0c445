pub mod admin;
pub mod feed;
pub mod lifecycle;
pub mod listener;
pub mod widget;

pub use self::admin::{ AdminConsole, ReplyOutcome, DEFAULT_SENDER_NAME };
pub use self::feed::MessageFeed;
pub use self::lifecycle::{ validate_contact, ChatLifecycle, ChatState, StartedChat, DEFAULT_GREETING };
pub use self::listener::{ Invalidated, LiveUpdateListener };
pub use self::widget::{ CustomerWidget, WidgetView };
