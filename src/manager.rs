//! Lifecycle procedures for the bot fleet: add, start, stop, bulk start/stop
//! and message logging. This layer is the sole writer of the durable `state`
//! flag; the worker registry never persists anything itself.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::models::{Bot, IncomingMessage};
use crate::telegram::{BotConnector, ConnectorError, WorkerRegistry};

/// How a caller identifies a bot. Replaces the legacy `0`/`'#'` sentinel
/// wildcards, which the HTTP layer translates before calling in.
#[derive(Debug, Clone)]
pub enum BotRef {
    ById(i64),
    ByUsername(String),
}

impl std::fmt::Display for BotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotRef::ById(id) => write!(f, "id:{}", id),
            BotRef::ByUsername(name) => write!(f, "username:{}", name),
        }
    }
}

/// Outcome of a start request. `code` carries the legacy numeric value the
/// REST callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    NotFound,
    TestBot,
    Internal,
}

impl StartOutcome {
    pub fn code(&self) -> i32 {
        match self {
            StartOutcome::Started => 1,
            StartOutcome::NotFound => -1,
            StartOutcome::TestBot => -2,
            StartOutcome::Internal => 0,
        }
    }
}

/// Outcome of a stop request. Test bots and never-started live bots share
/// the -2 wire code; the `test_bot` payload keeps them apart internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
    NeverStarted { test_bot: bool },
    Internal,
}

impl StopOutcome {
    pub fn code(&self) -> i32 {
        match self {
            StopOutcome::Stopped => 1,
            StopOutcome::NotFound => -1,
            StopOutcome::NeverStarted { .. } => -2,
            StopOutcome::Internal => 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("a bot with this token is already registered")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct AddedBot {
    pub username: String,
    pub started: bool,
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Persist an inbound text event. A save failure is surfaced, never
/// swallowed; silently losing a logged message would be a data-loss bug.
pub fn log_incoming_message(db: &Database, msg: IncomingMessage) -> Result<i64, LifecycleError> {
    let bot_id = msg.bot_id;
    let chat_id = msg.chat_id;
    let msg_id = db.insert_message(&msg).map_err(|e| {
        log::error!(
            "Unable to log message for chat {} (bot {}): {}",
            chat_id,
            bot_id,
            e
        );
        LifecycleError::Database(e)
    })?;
    log::info!(
        "New message {} logged for chat {} by bot {}",
        msg_id,
        chat_id,
        bot_id
    );
    Ok(msg_id)
}

pub struct BotManager {
    db: Arc<Database>,
    registry: WorkerRegistry,
    connector: Arc<dyn BotConnector>,
    /// Per-bot serialization: concurrent start/stop calls for one bot never
    /// interleave their registry and catalog mutations.
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl BotManager {
    pub fn new(
        db: Arc<Database>,
        registry: WorkerRegistry,
        connector: Arc<dyn BotConnector>,
    ) -> Self {
        Self {
            db,
            registry,
            connector,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    fn lock_for(&self, bot_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(bot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolve(&self, bot_ref: &BotRef) -> Result<Option<Bot>, rusqlite::Error> {
        match bot_ref {
            BotRef::ById(id) => self.db.get_bot(*id),
            BotRef::ByUsername(name) => self.db.get_bot_by_username(name),
        }
    }

    /// Register a new bot. Test bots are catalog-only placeholders; live
    /// bots are identity-checked against the remote service and immediately
    /// started.
    pub async fn add_bot(&self, token: &str, testing: bool) -> Result<AddedBot, LifecycleError> {
        if token.trim().is_empty() {
            return Err(LifecycleError::InvalidArgument(
                "no token provided to add new bot".to_string(),
            ));
        }

        if testing {
            let bot = self.db.create_test_bot(token).map_err(|e| {
                if is_unique_violation(&e) {
                    log::warn!("Attempted to register a test bot with a previously used token");
                    LifecycleError::AlreadyExists
                } else {
                    LifecycleError::Database(e)
                }
            })?;
            let username = bot.username.unwrap_or_default();
            log::info!("New test bot {} added to database", username);
            return Ok(AddedBot {
                username,
                started: false,
            });
        }

        let identity = match self.connector.identity(token).await {
            Ok(identity) => identity,
            Err(e) => {
                log::warn!("Bad token used for adding live bot: {}", e);
                let (ConnectorError::InvalidToken(msg) | ConnectorError::Network(msg)) = e;
                return Err(LifecycleError::InvalidToken(msg));
            }
        };

        let bot = self
            .db
            .create_live_bot(
                &identity.username,
                &identity.first_name,
                identity.last_name.as_deref(),
                token,
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    log::warn!(
                        "A new bot was attempted to be registered using a previously used token"
                    );
                    LifecycleError::AlreadyExists
                } else {
                    LifecycleError::Database(e)
                }
            })?;

        let started = matches!(
            self.start_bot(BotRef::ById(bot.bot_id)).await,
            Ok(StartOutcome::Started)
        );
        log::info!(
            "New live bot @{} added to database, polling={}",
            identity.username,
            started
        );
        Ok(AddedBot {
            username: identity.username,
            started,
        })
    }

    /// Start polling for a registered bot. Idempotent: starting an already
    /// polling bot reports `Started` again without spawning a second worker.
    pub async fn start_bot(&self, bot_ref: BotRef) -> Result<StartOutcome, LifecycleError> {
        let Some(found) = self.resolve(&bot_ref)? else {
            log::error!("No bot found with {} for starting the polling", bot_ref);
            return Ok(StartOutcome::NotFound);
        };
        if found.test_bot {
            log::error!("Cannot start polling for test bot with {}", bot_ref);
            return Ok(StartOutcome::TestBot);
        }

        let lock = self.lock_for(found.bot_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent call may have deleted the bot.
        let Some(bot) = self.db.get_bot(found.bot_id)? else {
            return Ok(StartOutcome::NotFound);
        };

        // A previously validated token going bad is exceptional, not a
        // numeric return code.
        self.registry.ensure(&bot).await.map_err(|e| {
            log::error!("Unable to start polling for bot {}: {}", bot.bot_id, e);
            LifecycleError::InvalidToken(e.to_string())
        })?;

        if !self.registry.start_polling(&bot) {
            log::error!("Worker handle missing for bot {} after ensure", bot.bot_id);
            return Ok(StartOutcome::Internal);
        }

        self.db.set_bot_state(bot.bot_id, true)?;
        log::info!("Successfully started polling for live bot {}", bot_ref);
        Ok(StartOutcome::Started)
    }

    /// Stop a bot from polling. Blocks until the worker has acknowledged
    /// cancellation before flipping the durable flag.
    pub async fn stop_bot(&self, bot_ref: BotRef) -> Result<StopOutcome, LifecycleError> {
        let Some(found) = self.resolve(&bot_ref)? else {
            log::error!("No bot found with {} for stopping the polling", bot_ref);
            return Ok(StopOutcome::NotFound);
        };

        let lock = self.lock_for(found.bot_id);
        let _guard = lock.lock().await;

        let Some(bot) = self.db.get_bot(found.bot_id)? else {
            return Ok(StopOutcome::NotFound);
        };

        if !bot.state {
            log::warn!("Bot {} never started polling, nothing to stop", bot_ref);
            return Ok(StopOutcome::NeverStarted {
                test_bot: bot.test_bot,
            });
        }

        // The durable flag says polling but the registry lost the worker
        // (e.g. after a restart): reconstruct it only to stop it.
        if !self.registry.contains(bot.bot_id) {
            if let Err(e) = self.registry.ensure(&bot).await {
                log::error!("Unable to stop polling for bot {}: {}", bot.bot_id, e);
                return Ok(StopOutcome::Internal);
            }
        }

        self.registry.stop_polling(bot.bot_id).await;

        if let Err(e) = self.db.set_bot_state(bot.bot_id, false) {
            log::error!("Failed to persist stopped state for bot {}: {}", bot.bot_id, e);
            return Ok(StopOutcome::Internal);
        }
        log::info!("Successfully stopped polling for bot {}", bot_ref);
        Ok(StopOutcome::Stopped)
    }

    /// Start every live bot in the catalog. Individual failures are skipped,
    /// never aborting the batch; returns the ids that started.
    pub async fn start_all(&self) -> Vec<i64> {
        let bots = match self.db.list_live_bots() {
            Ok(bots) => bots,
            Err(e) => {
                log::error!("Unable to list live bots for start_all: {}", e);
                return Vec::new();
            }
        };
        let total = bots.len();

        let mut started = Vec::new();
        for bot in bots {
            match self.start_bot(BotRef::ById(bot.bot_id)).await {
                Ok(StartOutcome::Started) => started.push(bot.bot_id),
                Ok(outcome) => {
                    log::warn!(
                        "Skipping bot {} in start_all (code {})",
                        bot.bot_id,
                        outcome.code()
                    );
                }
                Err(e) => log::warn!("Skipping bot {} in start_all: {}", bot.bot_id, e),
            }
        }
        log::info!(
            "Successfully started polling for {} of {} live bots",
            started.len(),
            total
        );
        started
    }

    /// Stop every bot with a handle in the worker registry. Individual
    /// failures are skipped; returns the ids that stopped.
    pub async fn stop_all(&self) -> Vec<i64> {
        let mut stopped = Vec::new();
        for bot_id in self.registry.worker_ids() {
            match self.stop_bot(BotRef::ById(bot_id)).await {
                Ok(StopOutcome::Stopped) => stopped.push(bot_id),
                Ok(outcome) => {
                    log::warn!(
                        "Skipping bot {} in stop_all (code {})",
                        bot_id,
                        outcome.code()
                    );
                }
                Err(e) => log::warn!("Skipping bot {} in stop_all: {}", bot_id, e),
            }
        }
        log::info!(
            "Successfully stopped polling for {} previously running bots",
            stopped.len()
        );
        stopped
    }

    /// Boot-time reconciliation: resume polling for every live bot whose
    /// durable state says it should be polling.
    pub async fn start_marked(&self) -> Vec<i64> {
        let bots = match self.db.list_marked_bots() {
            Ok(bots) => bots,
            Err(e) => {
                log::error!("Unable to list marked bots: {}", e);
                return Vec::new();
            }
        };

        let mut resumed = Vec::new();
        for bot in bots {
            match self.start_bot(BotRef::ById(bot.bot_id)).await {
                Ok(StartOutcome::Started) => resumed.push(bot.bot_id),
                Ok(outcome) => log::warn!(
                    "Could not resume bot {} (code {})",
                    bot.bot_id,
                    outcome.code()
                ),
                Err(e) => log::warn!("Could not resume bot {}: {}", bot.bot_id, e),
            }
        }
        resumed
    }

    /// Delete a bot, stopping and dropping its worker first. With `cascade`,
    /// also deletes every message it logged. Returns the deleted bot's
    /// username and the number of removed messages, or None when not found.
    pub async fn delete_bot(
        &self,
        bot_ref: BotRef,
        cascade: bool,
    ) -> Result<Option<(String, usize)>, LifecycleError> {
        let Some(found) = self.resolve(&bot_ref)? else {
            return Ok(None);
        };

        let lock = self.lock_for(found.bot_id);
        let _guard = lock.lock().await;

        let Some(bot) = self.db.get_bot(found.bot_id)? else {
            return Ok(None);
        };

        self.registry.stop_polling(bot.bot_id).await;
        self.registry.remove(bot.bot_id);
        self.db.delete_bot(bot.bot_id)?;

        let removed_messages = if cascade {
            self.db.delete_messages_by_bot(bot.bot_id)?
        } else {
            0
        };

        let username = bot.username.unwrap_or_default();
        log::info!(
            "Deleted bot {} ({} logged messages removed)",
            username,
            removed_messages
        );
        Ok(Some((username, removed_messages)))
    }
}
