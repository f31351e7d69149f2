//! Integration tests for the bot lifecycle: registration, start/stop
//! round-trips, bulk operations and the no-message-after-stop invariant.
//! All tests run against an in-memory database and a scripted connector.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};

use crate::db::Database;
use crate::manager::{BotManager, BotRef, LifecycleError, StartOutcome, StopOutcome};
use crate::models::{BotIdentity, IncomingMessage};
use crate::telegram::mock::MockConnector;
use crate::telegram::{BotConnector, WorkerRegistry};

fn harness() -> (Arc<Database>, Arc<MockConnector>, BotManager) {
    let db = Arc::new(Database::new(":memory:").expect("in-memory db"));
    let mock = Arc::new(MockConnector::new());
    let connector: Arc<dyn BotConnector> = mock.clone();
    let registry = WorkerRegistry::new(db.clone(), connector.clone());
    let manager = BotManager::new(db.clone(), registry, connector);
    (db, mock, manager)
}

fn identity(username: &str) -> BotIdentity {
    BotIdentity {
        remote_id: 7_000_000,
        username: username.to_string(),
        first_name: "Test".to_string(),
        last_name: None,
    }
}

fn event(bot_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        date: Utc::now(),
        sender_username: Some("alice".to_string()),
        sender_firstname: Some("Alice".to_string()),
        sender_lastname: None,
        chat_id: 42,
        text: text.to_string(),
        bot_id,
    }
}

/// Wait until the database holds `expected` messages, or panic.
async fn wait_for_messages(db: &Database, expected: i64) {
    for _ in 0..100 {
        if db.count_messages().expect("count messages") == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} messages, found {}",
        expected,
        db.count_messages().expect("count messages")
    );
}

#[tokio::test]
async fn add_live_bot_validates_and_starts_polling() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));

    let added = manager.add_bot("T1", false).await.expect("add live bot");
    assert_eq!(added.username, "alice_bot");
    assert!(added.started);

    let bot = db
        .get_bot_by_username("alice_bot")
        .expect("query")
        .expect("bot exists");
    assert!(bot.state);
    assert!(!bot.test_bot);
    assert!(manager.registry().is_running(bot.bot_id));
    assert!(mock.is_receiving(bot.bot_id));
}

#[tokio::test]
async fn add_test_bot_gets_placeholder_username_and_never_polls() {
    let (db, mock, manager) = harness();

    let added = manager.add_bot("TEST-1", true).await.expect("add test bot");
    assert!(!added.started);

    let bot = db
        .get_bot_by_username(&added.username)
        .expect("query")
        .expect("bot exists");
    assert_eq!(added.username, format!("testbot-{}", bot.bot_id));
    assert!(bot.test_bot);
    assert!(!bot.state);
    assert_eq!(mock.receiving_count(), 0);
}

#[tokio::test]
async fn duplicate_token_is_rejected() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));

    manager.add_bot("T1", false).await.expect("first add");
    let err = manager.add_bot("T1", false).await.expect_err("second add");
    assert!(matches!(err, LifecycleError::AlreadyExists));
    assert_eq!(db.count_bots().expect("count"), 1);

    // Same rule for test bots reusing a live token.
    let err = manager.add_bot("T1", true).await.expect_err("test reuse");
    assert!(matches!(err, LifecycleError::AlreadyExists));
}

#[tokio::test]
async fn empty_token_is_rejected() {
    let (db, _mock, manager) = harness();
    let err = manager.add_bot("  ", false).await.expect_err("blank token");
    assert!(matches!(err, LifecycleError::InvalidArgument(_)));
    assert_eq!(db.count_bots().expect("count"), 0);
}

#[tokio::test]
async fn start_unknown_bot_reports_not_found() {
    let (_db, _mock, manager) = harness();

    let outcome = manager
        .start_bot(BotRef::ById(999))
        .await
        .expect("start call");
    assert_eq!(outcome, StartOutcome::NotFound);
    assert_eq!(outcome.code(), -1);

    let outcome = manager
        .start_bot(BotRef::ByUsername("ghost_bot".to_string()))
        .await
        .expect("start call");
    assert_eq!(outcome, StartOutcome::NotFound);
}

#[tokio::test]
async fn start_is_idempotent() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    manager.add_bot("T1", false).await.expect("add");
    let bot_id = db
        .get_bot_by_username("alice_bot")
        .expect("query")
        .expect("exists")
        .bot_id;

    let outcome = manager
        .start_bot(BotRef::ById(bot_id))
        .await
        .expect("restart");
    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(outcome.code(), 1);
    // Still exactly one worker receiving.
    assert_eq!(mock.receiving_count(), 1);
}

#[tokio::test]
async fn stop_round_trip_flips_durable_state() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    manager.add_bot("T1", false).await.expect("add");
    let bot_id = db
        .get_bot_by_username("alice_bot")
        .expect("query")
        .expect("exists")
        .bot_id;

    let outcome = manager
        .stop_bot(BotRef::ByUsername("alice_bot".to_string()))
        .await
        .expect("stop");
    assert_eq!(outcome, StopOutcome::Stopped);
    assert!(!db.get_bot(bot_id).expect("query").expect("exists").state);
    assert!(!mock.is_receiving(bot_id));
    // The handle survives the stop for a cheap restart.
    assert!(manager.registry().contains(bot_id));

    // Stopping again: the bot never (re)started polling.
    let outcome = manager
        .stop_bot(BotRef::ById(bot_id))
        .await
        .expect("second stop");
    assert_eq!(outcome, StopOutcome::NeverStarted { test_bot: false });
    assert_eq!(outcome.code(), -2);

    // And it can come back.
    let outcome = manager
        .start_bot(BotRef::ById(bot_id))
        .await
        .expect("restart");
    assert_eq!(outcome, StartOutcome::Started);
    assert!(mock.is_receiving(bot_id));
}

#[tokio::test]
async fn test_bot_cannot_start_or_stop_polling() {
    let (db, _mock, manager) = harness();
    let added = manager.add_bot("TEST-1", true).await.expect("add test bot");
    let bot_id = db
        .get_bot_by_username(&added.username)
        .expect("query")
        .expect("exists")
        .bot_id;

    let outcome = manager
        .start_bot(BotRef::ById(bot_id))
        .await
        .expect("start");
    assert_eq!(outcome, StartOutcome::TestBot);
    assert_eq!(outcome.code(), -2);

    let outcome = manager.stop_bot(BotRef::ById(bot_id)).await.expect("stop");
    assert_eq!(outcome, StopOutcome::NeverStarted { test_bot: true });

    assert!(!manager.registry().contains(bot_id));
}

#[tokio::test]
async fn start_all_skips_test_bots_and_stop_all_reverses() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    mock.register_identity("T2", identity("bob_bot"));

    manager.add_bot("T1", false).await.expect("add alice");
    manager.add_bot("T2", false).await.expect("add bob");
    manager.add_bot("TEST-1", true).await.expect("add test bot");

    // Knock the live bots down first so start_all does the starting.
    let stopped = manager.stop_all().await;
    assert_eq!(stopped.len(), 2);
    assert_eq!(mock.receiving_count(), 0);

    let mut started = manager.start_all().await;
    started.sort_unstable();
    assert_eq!(started.len(), 2);
    assert_eq!(mock.receiving_count(), 2);
    for bot_id in &started {
        assert!(db.get_bot(*bot_id).expect("query").expect("exists").state);
    }

    let mut stopped = manager.stop_all().await;
    stopped.sort_unstable();
    assert_eq!(stopped, started);
    assert_eq!(mock.receiving_count(), 0);
}

#[tokio::test]
async fn messages_are_logged_only_while_polling() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    manager.add_bot("T1", false).await.expect("add");
    let bot_id = db
        .get_bot_by_username("alice_bot")
        .expect("query")
        .expect("exists")
        .bot_id;

    assert!(mock.push_event(bot_id, event(bot_id, "hello there")));
    wait_for_messages(&db, 1).await;

    // The /start command is acknowledged but never persisted.
    assert!(mock.push_event(bot_id, event(bot_id, "/start")));
    assert!(mock.push_event(bot_id, event(bot_id, "second message")));
    wait_for_messages(&db, 2).await;

    let outcome = manager.stop_bot(BotRef::ById(bot_id)).await.expect("stop");
    assert_eq!(outcome, StopOutcome::Stopped);

    // After stop returns, the worker is gone and nothing more gets logged.
    assert!(!mock.push_event(bot_id, event(bot_id, "too late")));
    sleep(Duration::from_millis(50)).await;
    assert_eq!(db.count_messages().expect("count"), 2);
}

#[tokio::test]
async fn starting_a_bot_with_a_revoked_token_fails_cleanly() {
    let (db, _mock, manager) = harness();
    // Registered in the catalog, but the connector no longer recognizes the
    // token.
    let bot = db
        .create_live_bot("stale_bot", "Stale", None, "REVOKED")
        .expect("insert");

    let err = manager
        .start_bot(BotRef::ById(bot.bot_id))
        .await
        .expect_err("start must fail");
    assert!(matches!(err, LifecycleError::InvalidToken(_)));
    // No half-constructed worker is left behind.
    assert!(!manager.registry().contains(bot.bot_id));
    assert!(!db.get_bot(bot.bot_id).expect("query").expect("exists").state);
}

#[tokio::test]
async fn delete_bot_stops_worker_and_optionally_cascades() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    manager.add_bot("T1", false).await.expect("add");
    let bot_id = db
        .get_bot_by_username("alice_bot")
        .expect("query")
        .expect("exists")
        .bot_id;

    assert!(mock.push_event(bot_id, event(bot_id, "kept or cascaded")));
    wait_for_messages(&db, 1).await;

    let (username, removed) = manager
        .delete_bot(BotRef::ById(bot_id), true)
        .await
        .expect("delete")
        .expect("bot existed");
    assert_eq!(username, "alice_bot");
    assert_eq!(removed, 1);
    assert_eq!(db.count_bots().expect("count"), 0);
    assert_eq!(db.count_messages().expect("count"), 0);
    assert!(!manager.registry().contains(bot_id));

    // Deleting again reports not found.
    let gone = manager
        .delete_bot(BotRef::ById(bot_id), false)
        .await
        .expect("delete");
    assert!(gone.is_none());
}

#[tokio::test]
async fn start_marked_resumes_only_flagged_live_bots() {
    let (db, mock, manager) = harness();
    mock.register_identity("T1", identity("alice_bot"));
    mock.register_identity("T2", identity("bob_bot"));

    let alice = db
        .create_live_bot("alice_bot", "Alice", None, "T1")
        .expect("insert");
    let bob = db
        .create_live_bot("bob_bot", "Bob", None, "T2")
        .expect("insert");
    // Simulate a previous run that left only alice marked as polling.
    db.set_bot_state(alice.bot_id, true).expect("mark");

    let resumed = manager.start_marked().await;
    assert_eq!(resumed, vec![alice.bot_id]);
    assert!(mock.is_receiving(alice.bot_id));
    assert!(!mock.is_receiving(bob.bot_id));
}
