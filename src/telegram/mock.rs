//! Scripted connector for exercising the lifecycle layer without a network.
//!
//! Identities are registered per token; unknown tokens are rejected the way
//! the real service rejects a bad credential. Incoming events pushed through
//! [`MockConnector::push_event`] travel the same logging path as real ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::db::Database;
use crate::manager::log_incoming_message;
use crate::models::{Bot as BotRecord, BotIdentity, IncomingMessage};

use super::connector::{BotConnector, ConnectorError};

#[derive(Default)]
pub struct MockConnector {
    identities: Mutex<HashMap<String, BotIdentity>>,
    feeds: Mutex<HashMap<i64, mpsc::UnboundedSender<IncomingMessage>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_identity(&self, token: &str, identity: BotIdentity) {
        self.identities
            .lock()
            .unwrap()
            .insert(token.to_string(), identity);
    }

    /// Feed an event to the bot's running worker. Returns false when no
    /// worker is receiving for this bot.
    pub fn push_event(&self, bot_id: i64, event: IncomingMessage) -> bool {
        match self.feeds.lock().unwrap().get(&bot_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Number of workers currently receiving events.
    pub fn receiving_count(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }

    pub fn is_receiving(&self, bot_id: i64) -> bool {
        self.feeds.lock().unwrap().contains_key(&bot_id)
    }
}

#[async_trait]
impl BotConnector for MockConnector {
    async fn identity(&self, token: &str) -> Result<BotIdentity, ConnectorError> {
        self.identities
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| ConnectorError::InvalidToken(format!("unknown token: {}", token)))
    }

    async fn run(
        &self,
        record: BotRecord,
        db: Arc<Database>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().insert(record.bot_id, tx);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                Some(event) = rx.recv() => {
                    if event.text.trim_start().starts_with("/start") {
                        log::info!(
                            "Chat {}: logging started by bot {}",
                            event.chat_id,
                            record.bot_id
                        );
                        continue;
                    }
                    if let Err(e) = log_incoming_message(&db, event) {
                        log::error!("Mock worker for bot {}: {}", record.bot_id, e);
                    }
                }
            }
        }

        // Dropping the feed before returning guarantees nothing can be
        // delivered after stop_polling observes this task's exit.
        self.feeds.lock().unwrap().remove(&record.bot_id);
        Ok(())
    }
}
