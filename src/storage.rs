use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode};

use crate::crypto::hash_password;
use crate::error::{ChatError, Result};
use crate::models::{Message, User};

/// User directory and conversation store over a single SQLite connection.
///
/// The database is the sole owner of all durable state. All calls are
/// synchronous and issued from a single control flow, so no locking is done
/// here; SQLite serializes its own writes.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (or create) the database, ensure the schema, and seed demo data
    /// if the `users` table is empty.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let storage = Storage { conn };
        storage.ensure_schema()?;
        storage.seed_if_empty()?;
        Ok(storage)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_user INTEGER NOT NULL,
                to_user INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Seed three demo accounts and an opening exchange between the first
    /// two, but only when the `users` table is empty. Safe to call on every
    /// startup.
    fn seed_if_empty(&self) -> Result<()> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if users > 0 {
            return Ok(());
        }
        info!("empty database, seeding demo accounts");
        for (username, password) in [
            ("alice", "alicepass"),
            ("bob", "bobpass"),
            ("carol", "carolpass"),
        ] {
            self.conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                params![username, hash_password(password)],
            )?;
        }
        for (from, to, content) in [
            (1, 2, "Hi Bob! This is Alice."),
            (2, 1, "Hey Alice, nice to meet you."),
        ] {
            self.conn.execute(
                "INSERT INTO messages (from_user, to_user, content, created_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![from, to, content],
            )?;
        }
        Ok(())
    }

    /// Create a new account and return its id. The plaintext password is
    /// digested before it reaches the database. Uniqueness is enforced by the
    /// UNIQUE constraint, not a pre-check, so a duplicate surfaces only after
    /// the insert attempt.
    pub fn register(&self, username: &str, password: &str) -> Result<i64> {
        let inserted = self.conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, hash_password(password)],
        );
        match inserted {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                info!("registered user {username:?} as id {id}");
                Ok(id)
            }
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(ChatError::DuplicateUsername)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and return the user's id. A missing user and a wrong
    /// password both come back as `InvalidCredentials`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<i64> {
        let row = self.conn.query_row(
            "SELECT id, username, password_hash FROM users WHERE username = ?1",
            [username],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                })
            },
        );
        match row {
            Ok(user) if user.password_hash == hash_password(password) => Ok(user.id),
            Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(ChatError::InvalidCredentials)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All registered users except the given one, ordered by username. This
    /// is the roster shown next to the chat pane.
    pub fn list_others(&self, excluding: i64) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username FROM users WHERE id != ?1 ORDER BY username")?;
        let rows = stmt.query_map([excluding], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Display-name lookup that never fails: an unknown id degrades to a
    /// placeholder so transcript rendering is never blocked.
    pub fn username_of(&self, id: i64) -> String {
        self.conn
            .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .unwrap_or_else(|_| format!("user:{id}"))
    }

    /// Append a message. `created_at` comes from the database clock, not the
    /// caller. Content validation happens upstream.
    pub fn send_message(&self, from: i64, to: i64, content: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (from_user, to_user, content, created_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![from, to, content],
        )?;
        debug!("stored message from {from} to {to}");
        Ok(())
    }

    /// Every message exchanged between the two users, in either direction,
    /// in insertion order. Symmetric in its arguments.
    pub fn transcript(&self, a: i64, b: i64) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_user, to_user, content, created_at FROM messages
             WHERE (from_user = ?1 AND to_user = ?2)
                OR (from_user = ?2 AND to_user = ?1)
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([a, b], |row| {
            Ok(Message {
                id: row.get(0)?,
                from_user: row.get(1)?,
                to_user: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    #[cfg(test)]
    pub(crate) fn reseed(&self) -> Result<()> {
        self.seed_if_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_in_memory_db() -> Storage {
        Storage::open(":memory:").unwrap()
    }

    #[test]
    fn test_register_then_authenticate() {
        let storage = setup_in_memory_db();
        let id = storage.register("dave", "davepass").unwrap();
        assert_eq!(storage.authenticate("dave", "davepass").unwrap(), id);
    }

    #[test]
    fn test_register_duplicate_username() {
        let storage = setup_in_memory_db();
        storage.register("dave", "first").unwrap();
        let result = storage.register("dave", "second");
        assert!(matches!(result, Err(ChatError::DuplicateUsername)));
    }

    #[test]
    fn test_seeded_account_can_authenticate() {
        let storage = setup_in_memory_db();
        assert_eq!(storage.authenticate("alice", "alicepass").unwrap(), 1);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let storage = setup_in_memory_db();
        let result = storage.authenticate("alice", "wrong");
        assert!(matches!(result, Err(ChatError::InvalidCredentials)));
    }

    #[test]
    fn test_unknown_username_rejected() {
        let storage = setup_in_memory_db();
        let result = storage.authenticate("nobody", "alicepass");
        assert!(matches!(result, Err(ChatError::InvalidCredentials)));
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let storage = setup_in_memory_db();
        storage.reseed().unwrap();
        let roster = storage.list_others(0).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(storage.transcript(1, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_seeded_transcript_between_alice_and_bob() {
        let storage = setup_in_memory_db();
        let messages = storage.transcript(1, 2).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].from_user, 1);
        assert_eq!(messages[0].content, "Hi Bob! This is Alice.");
        assert_eq!(messages[1].from_user, 2);
    }

    #[test]
    fn test_transcript_is_symmetric() {
        let storage = setup_in_memory_db();
        storage.send_message(1, 3, "hello carol").unwrap();
        storage.send_message(3, 1, "hello alice").unwrap();
        assert_eq!(storage.transcript(1, 3).unwrap(), storage.transcript(3, 1).unwrap());
    }

    #[test]
    fn test_send_appends_in_order() {
        let storage = setup_in_memory_db();
        let before = storage.transcript(1, 2).unwrap();
        storage.send_message(1, 2, "a new message").unwrap();
        let after = storage.transcript(1, 2).unwrap();
        assert_eq!(after.len(), before.len() + 1);
        let last = after.last().unwrap();
        assert_eq!(last.from_user, 1);
        assert_eq!(last.to_user, 2);
        assert_eq!(last.content, "a new message");
        assert!(last.id > before.last().unwrap().id);
    }

    #[test]
    fn test_transcript_excludes_other_pairs() {
        let storage = setup_in_memory_db();
        storage.send_message(1, 3, "for carol only").unwrap();
        let messages = storage.transcript(1, 2).unwrap();
        assert!(messages.iter().all(|m| m.content != "for carol only"));
    }

    #[test]
    fn test_list_others_excludes_caller_and_sorts() {
        let storage = setup_in_memory_db();
        let roster = storage.list_others(2).unwrap();
        let names: Vec<&str> = roster.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, ["alice", "carol"]);
    }

    #[test]
    fn test_username_of_falls_back_on_unknown_id() {
        let storage = setup_in_memory_db();
        assert_eq!(storage.username_of(1), "alice");
        assert_eq!(storage.username_of(999), "user:999");
    }
}
