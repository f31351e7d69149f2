use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logged incoming message. Append-only; `bot_id` is not a foreign key, so
/// rows may outlive the bot that received them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: i64,
    pub date: DateTime<Utc>,
    pub sender_username: Option<String>,
    pub sender_firstname: Option<String>,
    pub sender_lastname: Option<String>,
    pub chat_id: i64,
    pub text_content: String,
    pub bot_id: i64,
}

/// API view of a logged message. Absent sender fields are rendered as
/// "unknown"/"na" here, not in storage.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message_id: i64,
    pub date: DateTime<Utc>,
    pub chat_id: i64,
    pub sender_username: String,
    pub sender_firstname: String,
    pub sender_lastname: String,
    pub text: String,
    pub bot_id: i64,
}

impl From<Message> for MessageView {
    fn from(msg: Message) -> Self {
        Self {
            message_id: msg.msg_id,
            date: msg.date,
            chat_id: msg.chat_id,
            sender_username: msg.sender_username.unwrap_or_else(|| "unknown".to_string()),
            sender_firstname: msg.sender_firstname.unwrap_or_else(|| "na".to_string()),
            sender_lastname: msg.sender_lastname.unwrap_or_else(|| "na".to_string()),
            text: msg.text_content,
            bot_id: msg.bot_id,
        }
    }
}

/// An inbound text event observed by a polling worker, ready to be logged.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub date: DateTime<Utc>,
    pub sender_username: Option<String>,
    pub sender_firstname: Option<String>,
    pub sender_lastname: Option<String>,
    pub chat_id: i64,
    pub text: String,
    pub bot_id: i64,
}

/// Filter criteria for the message query. Wildcard sentinels (`#`, empty)
/// are translated to `None` at the HTTP boundary; the core never sees them.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Window in minutes; <= 0 means "all messages up to now".
    pub time_window_min: i64,
    /// Exact bot match.
    pub bot_id: Option<i64>,
    /// Case-insensitive substring match on the message text.
    pub text: Option<String>,
    /// Case-insensitive exact match on the sender's username.
    pub username: Option<String>,
    /// Case-insensitive substring match on the sender's first OR last name.
    pub name: Option<String>,
}

impl MessageFilter {
    /// Effective window start: `now - window`, where a non-positive window
    /// widens to the minutes elapsed since the epoch.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let minutes = if self.time_window_min > 0 {
            self.time_window_min
        } else {
            now.timestamp() / 60
        };
        now - chrono::Duration::minutes(minutes)
    }
}
