//! Chat over IRC-on-websocket.

mod message;
mod parser;
mod ratelimit;
mod session;

pub use message::{ChatMessage, SYSTEM_SENDER, decode};
pub use parser::{IrcCommand, IrcLine, ParseError, Tag, parse_line};
pub use ratelimit::{Rate, RateLimiter, RateLimits};
pub use session::{
    ChatConfig, ChatObserver, ChatSession, ChatState, DEFAULT_CHAT_URL,
    SUBSCRIBER_QUEUE_CAPACITY, Subscription, TracingObserver,
};
