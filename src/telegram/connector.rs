use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::oneshot;

use crate::db::Database;
use crate::manager::log_incoming_message;
use crate::models::{Bot as BotRecord, BotIdentity, IncomingMessage};

/// Acknowledgment sent on `/start`. The command itself is never persisted.
pub const START_ACK: &str = "I'm a bot. I will be logging all this conversation.";

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("invalid bot token: {0}")]
    InvalidToken(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Port to the remote bot service: identity lookup for a credential, and a
/// long-lived polling loop that feeds incoming text into the message log.
#[async_trait]
pub trait BotConnector: Send + Sync {
    /// Resolve the identity behind a credential token.
    async fn identity(&self, token: &str) -> Result<BotIdentity, ConnectorError>;

    /// Run the polling loop for a registered bot until the shutdown signal
    /// fires. Must not log any message after returning.
    async fn run(
        &self,
        record: BotRecord,
        db: Arc<Database>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), String>;
}

/// Production connector backed by the Telegram Bot API.
pub struct TelegramConnector;

#[async_trait]
impl BotConnector for TelegramConnector {
    async fn identity(&self, token: &str) -> Result<BotIdentity, ConnectorError> {
        let bot = Bot::new(token);
        let me = match tokio::time::timeout(IDENTITY_TIMEOUT, bot.get_me()).await {
            Ok(Ok(me)) => me,
            Ok(Err(e)) => {
                log::error!("Telegram: token rejected by getMe: {}", e);
                return Err(ConnectorError::InvalidToken(e.to_string()));
            }
            // An unreachable service is indistinguishable from a bad token
            // for our callers; expiry counts as a credential failure.
            Err(_) => {
                log::error!("Telegram: getMe timed out after {:?}", IDENTITY_TIMEOUT);
                return Err(ConnectorError::InvalidToken(
                    "identity lookup timed out".to_string(),
                ));
            }
        };

        Ok(BotIdentity {
            remote_id: me.user.id.0 as i64,
            username: me.username().to_string(),
            first_name: me.user.first_name.clone(),
            last_name: me.user.last_name.clone(),
        })
    }

    async fn run(
        &self,
        record: BotRecord,
        db: Arc<Database>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), String> {
        let bot_id = record.bot_id;
        let bot_username = record.username.clone().unwrap_or_default();

        log::info!(
            "Starting Telegram listener for bot @{} (id={})",
            bot_username,
            bot_id
        );

        let bot = Bot::new(&record.token);

        let db_for_handler = db.clone();
        let username_for_handler = bot_username.clone();
        let handler = Update::filter_message().endpoint(
            move |bot: Bot, msg: teloxide::types::Message| {
                let db = db_for_handler.clone();
                let bot_username = username_for_handler.clone();
                async move {
                    let Some(text) = msg.text() else {
                        return Ok(());
                    };

                    if text.trim_start().starts_with("/start") {
                        if let Err(e) = bot.send_message(msg.chat.id, START_ACK).await {
                            log::error!(
                                "Telegram [@{}]: failed to send /start ack: {}",
                                bot_username,
                                e
                            );
                        }
                        log::info!(
                            "Chat {}: logging started by bot @{}",
                            msg.chat.id,
                            bot_username
                        );
                        return Ok(());
                    }

                    let sender = msg.from();
                    let incoming = IncomingMessage {
                        date: msg.date,
                        sender_username: sender.and_then(|u| u.username.clone()),
                        sender_firstname: sender.map(|u| u.first_name.clone()),
                        sender_lastname: sender.and_then(|u| u.last_name.clone()),
                        chat_id: msg.chat.id.0,
                        text: text.to_string(),
                        bot_id,
                    };

                    // Losing a logged message is a data-loss bug; surface the
                    // failure instead of swallowing it.
                    log_incoming_message(&db, incoming)?;

                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            },
        );

        let mut dispatcher = Dispatcher::builder(bot, handler).build();

        tokio::select! {
            _ = shutdown_rx => {
                log::info!("Telegram listener for bot @{} received shutdown signal", bot_username);
            }
            _ = dispatcher.dispatch() => {
                log::info!("Telegram listener for bot @{} stopped", bot_username);
            }
        }

        Ok(())
    }
}
