use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered bot. `test_bot` rows are catalog-only placeholders and can
/// never be started for polling; `state` is the durable "should be polling"
/// flag, reconciled with the worker registry by the lifecycle layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub bot_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(skip_serializing)]
    pub token: String,
    pub test_bot: bool,
    pub state: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity of a bot as reported by the Telegram API (`getMe`).
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub remote_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Response type for bot API endpoints (hides the credential token)
#[derive(Debug, Clone, Serialize)]
pub struct BotResponse {
    pub bot_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub test_bot: bool,
    pub state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

impl From<Bot> for BotResponse {
    fn from(bot: Bot) -> Self {
        Self {
            bot_id: bot.bot_id,
            username: bot.username,
            first_name: bot.first_name,
            last_name: bot.last_name,
            test_bot: bot.test_bot,
            state: bot.state,
            running: None,
        }
    }
}

impl BotResponse {
    pub fn with_running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }
}
