use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::db::Database;
use crate::models::Bot;

use super::connector::{BotConnector, ConnectorError};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one bot's polling worker. Owned exclusively by the registry;
/// the lifecycle layer never touches the underlying task.
pub struct WorkerHandle {
    pub bot_id: i64,
    pub token: String,
    pub running: bool,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

/// In-memory table of polling workers, at most one per bot id.
///
/// Handles survive a stop so a later start skips the identity round-trip;
/// only `remove` drops a handle entirely.
pub struct WorkerRegistry {
    db: Arc<Database>,
    connector: Arc<dyn BotConnector>,
    workers: Arc<DashMap<i64, WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new(db: Arc<Database>, connector: Arc<dyn BotConnector>) -> Self {
        Self {
            db,
            connector,
            workers: Arc::new(DashMap::new()),
        }
    }

    pub fn contains(&self, bot_id: i64) -> bool {
        self.workers.contains_key(&bot_id)
    }

    pub fn is_running(&self, bot_id: i64) -> bool {
        self.workers
            .get(&bot_id)
            .map(|h| h.running)
            .unwrap_or(false)
    }

    /// All bot ids with a handle, running or not.
    pub fn worker_ids(&self) -> Vec<i64> {
        self.workers.iter().map(|e| *e.key()).collect()
    }

    /// Construct the worker handle for this bot if it does not exist yet.
    /// First construction validates the credential against the remote
    /// service; on rejection no handle is left behind. Does not start
    /// polling.
    pub async fn ensure(&self, bot: &Bot) -> Result<(), ConnectorError> {
        if self.workers.contains_key(&bot.bot_id) {
            return Ok(());
        }

        self.connector.identity(&bot.token).await?;

        self.workers
            .entry(bot.bot_id)
            .or_insert_with(|| WorkerHandle {
                bot_id: bot.bot_id,
                token: bot.token.clone(),
                running: false,
                shutdown_tx: None,
                join: None,
            });
        Ok(())
    }

    /// Begin the worker's event-receiving loop. A second call on a running
    /// handle is a no-op. Returns false when no handle exists for the bot.
    pub fn start_polling(&self, bot: &Bot) -> bool {
        let Some(mut handle) = self.workers.get_mut(&bot.bot_id) else {
            return false;
        };
        if handle.running {
            return true;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connector = self.connector.clone();
        let db = self.db.clone();
        let workers = self.workers.clone();
        let record = bot.clone();
        let bot_id = bot.bot_id;

        let join = tokio::spawn(async move {
            if let Err(e) = connector.run(record, db, shutdown_rx).await {
                log::error!("Worker for bot {} exited with error: {}", bot_id, e);
            }
            if let Some(mut h) = workers.get_mut(&bot_id) {
                h.running = false;
                h.shutdown_tx = None;
            }
        });

        handle.running = true;
        handle.shutdown_tx = Some(shutdown_tx);
        handle.join = Some(join);
        true
    }

    /// Cancel the worker's event loop and wait until it has acknowledged,
    /// so no message can be logged after this returns. Safe to call on an
    /// already-stopped handle. Returns false when no handle exists.
    pub async fn stop_polling(&self, bot_id: i64) -> bool {
        let (shutdown_tx, join) = match self.workers.get_mut(&bot_id) {
            Some(mut h) => (h.shutdown_tx.take(), h.join.take()),
            None => return false,
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(join) = join {
            let abort = join.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, join).await.is_err() {
                log::warn!(
                    "Worker for bot {} did not stop within {:?}, aborting",
                    bot_id,
                    STOP_TIMEOUT
                );
                abort.abort();
            }
        }
        if let Some(mut h) = self.workers.get_mut(&bot_id) {
            h.running = false;
        }
        true
    }

    /// Drop the handle entirely. Used when a worker's credential is later
    /// found invalid.
    pub fn remove(&self, bot_id: i64) -> bool {
        self.workers.remove(&bot_id).is_some()
    }
}
