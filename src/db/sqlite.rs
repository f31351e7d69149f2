use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

use crate::models::{Bot, IncomingMessage, Message, MessageFilter};

pub struct Database {
    conn: Mutex<Connection>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn bot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    let created_at_str: String = row.get(7)?;
    Ok(Bot {
        bot_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        token: row.get(4)?,
        test_bot: row.get::<_, i32>(5)? != 0,
        state: row.get::<_, i32>(6)? != 0,
        created_at: parse_ts(&created_at_str),
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let date_str: String = row.get(1)?;
    Ok(Message {
        msg_id: row.get(0)?,
        date: parse_ts(&date_str),
        sender_username: row.get(2)?,
        sender_firstname: row.get(3)?,
        sender_lastname: row.get(4)?,
        chat_id: row.get(5)?,
        text_content: row.get(6)?,
        bot_id: row.get(7)?,
    })
}

const BOT_COLUMNS: &str =
    "bot_id, username, first_name, last_name, token, test_bot, state, created_at";
const MESSAGE_COLUMNS: &str =
    "msg_id, date, sender_username, sender_firstname, sender_lastname, chat_id, text_content, bot_id";

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if database_url != ":memory:" {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        // Registered bots. Token uniqueness is what prevents registering the
        // same bot twice.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bots (
                bot_id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE,
                first_name TEXT,
                last_name TEXT,
                token TEXT UNIQUE NOT NULL,
                test_bot INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Append-only message log. bot_id is intentionally not a foreign key;
        // messages may outlive the bot that received them.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                msg_id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                sender_username TEXT,
                sender_firstname TEXT,
                sender_lastname TEXT,
                chat_id INTEGER NOT NULL DEFAULT 0,
                text_content TEXT NOT NULL,
                bot_id INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(())
    }

    // Bot methods

    pub fn create_live_bot(
        &self,
        username: &str,
        first_name: &str,
        last_name: Option<&str>,
        token: &str,
    ) -> SqliteResult<Bot> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO bots (username, first_name, last_name, token, test_bot, state, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)",
            rusqlite::params![username, first_name, last_name, token, now.to_rfc3339()],
        )?;

        let id = conn.last_insert_rowid();

        Ok(Bot {
            bot_id: id,
            username: Some(username.to_string()),
            first_name: Some(first_name.to_string()),
            last_name: last_name.map(|s| s.to_string()),
            token: token.to_string(),
            test_bot: false,
            state: false,
            created_at: now,
        })
    }

    /// Insert a test-bot row, then fill in its `testbot-<id>` username once
    /// the id has been assigned.
    pub fn create_test_bot(&self, token: &str) -> SqliteResult<Bot> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO bots (first_name, last_name, token, test_bot, state, created_at)
             VALUES ('test', 'bot', ?1, 1, 0, ?2)",
            rusqlite::params![token, now.to_rfc3339()],
        )?;

        let id = conn.last_insert_rowid();
        let username = format!("testbot-{}", id);
        conn.execute(
            "UPDATE bots SET username = ?1 WHERE bot_id = ?2",
            rusqlite::params![username, id],
        )?;

        Ok(Bot {
            bot_id: id,
            username: Some(username),
            first_name: Some("test".to_string()),
            last_name: Some("bot".to_string()),
            token: token.to_string(),
            test_bot: true,
            state: false,
            created_at: now,
        })
    }

    pub fn get_bot(&self, id: i64) -> SqliteResult<Option<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM bots WHERE bot_id = ?1", BOT_COLUMNS))?;
        let bot = stmt.query_row([id], bot_from_row).ok();
        Ok(bot)
    }

    pub fn get_bot_by_username(&self, username: &str) -> SqliteResult<Option<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bots WHERE LOWER(username) = LOWER(?1)",
            BOT_COLUMNS
        ))?;
        let bot = stmt.query_row([username], bot_from_row).ok();
        Ok(bot)
    }

    pub fn list_bots(&self) -> SqliteResult<Vec<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM bots ORDER BY bot_id", BOT_COLUMNS))?;
        let bots = stmt
            .query_map([], bot_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(bots)
    }

    pub fn list_live_bots(&self) -> SqliteResult<Vec<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bots WHERE test_bot = 0 ORDER BY bot_id",
            BOT_COLUMNS
        ))?;
        let bots = stmt
            .query_map([], bot_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(bots)
    }

    /// Live bots whose durable state says they should be polling. Used for
    /// boot-time reconciliation.
    pub fn list_marked_bots(&self) -> SqliteResult<Vec<Bot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bots WHERE test_bot = 0 AND state = 1 ORDER BY bot_id",
            BOT_COLUMNS
        ))?;
        let bots = stmt
            .query_map([], bot_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(bots)
    }

    pub fn count_bots(&self) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM bots", [], |row| row.get(0))
    }

    pub fn set_bot_state(&self, id: i64, state: bool) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows_affected = conn.execute(
            "UPDATE bots SET state = ?1 WHERE bot_id = ?2",
            rusqlite::params![if state { 1 } else { 0 }, id],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn delete_bot(&self, id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows_affected = conn.execute("DELETE FROM bots WHERE bot_id = ?1", [id])?;
        Ok(rows_affected > 0)
    }

    pub fn delete_all_bots(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM bots", [])
    }

    // Message methods

    pub fn insert_message(&self, msg: &IncomingMessage) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (date, sender_username, sender_firstname, sender_lastname, chat_id, text_content, bot_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                msg.date.to_rfc3339(),
                msg.sender_username,
                msg.sender_firstname,
                msg.sender_lastname,
                msg.chat_id,
                msg.text,
                msg.bot_id
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn messages_by_bot(&self, bot_id: i64) -> SqliteResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE bot_id = ?1 ORDER BY date DESC",
            MESSAGE_COLUMNS
        ))?;
        let msgs = stmt
            .query_map([bot_id], message_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    pub fn messages_by_sender(&self, username: &str) -> SqliteResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE LOWER(sender_username) = LOWER(?1) ORDER BY date DESC",
            MESSAGE_COLUMNS
        ))?;
        let msgs = stmt
            .query_map([username], message_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    pub fn messages_by_chat(&self, chat_id: i64) -> SqliteResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY date DESC",
            MESSAGE_COLUMNS
        ))?;
        let msgs = stmt
            .query_map([chat_id], message_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    /// Combined filter query. Active criteria are AND-combined; wildcards are
    /// already normalized to `None` by the caller. Newest first.
    pub fn filter_messages(&self, filter: &MessageFilter) -> SqliteResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!("SELECT {} FROM messages WHERE date > ?1", MESSAGE_COLUMNS);
        let window_start = filter.window_start(Utc::now());

        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(window_start.to_rfc3339())];
        let mut param_idx = 2;

        if let Some(bot_id) = filter.bot_id {
            sql.push_str(&format!(" AND bot_id = ?{}", param_idx));
            params.push(Box::new(bot_id));
            param_idx += 1;
        }
        if let Some(ref text) = filter.text {
            sql.push_str(&format!(
                " AND LOWER(text_content) LIKE '%' || LOWER(?{}) || '%'",
                param_idx
            ));
            params.push(Box::new(text.clone()));
            param_idx += 1;
        }
        if let Some(ref username) = filter.username {
            sql.push_str(&format!(
                " AND LOWER(sender_username) = LOWER(?{})",
                param_idx
            ));
            params.push(Box::new(username.clone()));
            param_idx += 1;
        }
        if let Some(ref name) = filter.name {
            sql.push_str(&format!(
                " AND (LOWER(sender_firstname) LIKE '%' || LOWER(?{idx}) || '%' \
                 OR LOWER(sender_lastname) LIKE '%' || LOWER(?{idx}) || '%')",
                idx = param_idx
            ));
            params.push(Box::new(name.clone()));
        }

        sql.push_str(" ORDER BY date DESC");

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let msgs = stmt
            .query_map(params_ref.as_slice(), message_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    pub fn delete_messages_by_bot(&self, bot_id: i64) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE bot_id = ?1", [bot_id])
    }

    pub fn delete_all_messages(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages", [])
    }

    pub fn count_messages(&self) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
    }

    // Dummy data generators, admin/testing only

    pub fn generate_dummy_bots(&self, count: usize) -> usize {
        let mut created = 0;
        for _ in 0..count {
            let token = random_string(48);
            let username = format!("dummy_{}", random_string(8).to_lowercase());
            let first = FIRST_NAMES[rand::thread_rng().gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rand::thread_rng().gen_range(0..LAST_NAMES.len())];

            let conn = self.conn.lock().unwrap();
            let result = conn.execute(
                "INSERT INTO bots (username, first_name, last_name, token, test_bot, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, 0, ?5)",
                rusqlite::params![username, first, last, token, Utc::now().to_rfc3339()],
            );
            if result.is_ok() {
                created += 1;
            }
        }
        created
    }

    /// Generate dummy messages dated within the last 48 hours, attributed to
    /// random registered bots. Creates a handful of dummy bots first if the
    /// catalog is empty.
    pub fn generate_dummy_messages(&self, count: usize) -> usize {
        if self.count_bots().unwrap_or(0) == 0 {
            self.generate_dummy_bots((count / 5).max(1));
        }
        let bot_ids: Vec<i64> = self
            .list_bots()
            .unwrap_or_default()
            .iter()
            .map(|b| b.bot_id)
            .collect();
        if bot_ids.is_empty() {
            return 0;
        }

        let mut created = 0;
        for _ in 0..count {
            let mut rng = rand::thread_rng();
            let minutes_ago = rng.gen_range(0..48 * 60);
            let msg = IncomingMessage {
                date: Utc::now() - Duration::minutes(minutes_ago),
                sender_username: Some(format!("user_{}", random_string(6).to_lowercase())),
                sender_firstname: Some(
                    FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())].to_string(),
                ),
                sender_lastname: Some(LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())].to_string()),
                chat_id: rng.gen_range(1..100_000),
                text: SENTENCES[rng.gen_range(0..SENTENCES.len())].to_string(),
                bot_id: bot_ids[rng.gen_range(0..bot_ids.len())],
            };
            drop(rng);
            if self.insert_message(&msg).is_ok() {
                created += 1;
            }
        }
        created
    }
}

fn random_string(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald"];
const LAST_NAMES: &[&str] = &["Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth"];
const SENTENCES: &[&str] = &[
    "Hello there, is anyone reading this?",
    "The build is green again.",
    "Lunch at noon?",
    "Deploy went fine, closing the ticket.",
    "Can you resend the document?",
];
