//! Persistent SQLite store for conversation records.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use crate::onboarding::debounce::should_render_menu;
use crate::onboarding::record::ConversationRecord;

const RECORD_COLUMNS: &str = "user_id, full_name, language_code, request_id, source_selected, \
     last_menu_shown_at, active_chain_id, discussion_thread_id";

/// Conversation State Store.
///
/// Every read-modify-write happens while holding the connection lock, so
/// updates to one user's record never interleave.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Create a new in-memory store.
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let store = Self::init(Connection::open(path)?)?;
        info!("Opened conversation store at {:?} ({} users)", path, store.user_ids()?.len());
        Ok(store)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL DEFAULT '',
                language_code TEXT NOT NULL DEFAULT '',
                request_id INTEGER,
                source_selected INTEGER NOT NULL DEFAULT 0,
                last_menu_shown_at INTEGER,
                active_chain_id TEXT,
                discussion_thread_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, user_id: i64) -> rusqlite::Result<Option<ConversationRecord>> {
        select_record(&self.conn(), user_id)
    }

    /// Begin a fresh conversation for the user.
    ///
    /// Creates the record if needed, fills in `default_language` when no
    /// language was chosen yet, assigns a request id once and clears
    /// `source_selected`. Replaying it only overwrites the same fields.
    pub fn start_conversation(
        &self,
        user_id: i64,
        full_name: &str,
        default_language: &str,
    ) -> rusqlite::Result<ConversationRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_row(&tx, user_id)?;
        tx.execute(
            "UPDATE conversations
             SET full_name = ?2,
                 source_selected = 0,
                 language_code = CASE WHEN language_code = '' THEN ?3 ELSE language_code END
             WHERE user_id = ?1",
            params![user_id, full_name, default_language],
        )?;

        let request_id: Option<i64> = tx.query_row(
            "SELECT request_id FROM conversations WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        if request_id.is_none() {
            let id = next_request_id(&tx)?;
            tx.execute(
                "UPDATE conversations SET request_id = ?2 WHERE user_id = ?1",
                params![user_id, id],
            )?;
        }

        let record = select_record(&tx, user_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(record)
    }

    pub fn set_language(&self, user_id: i64, language_code: &str) -> rusqlite::Result<()> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        conn.execute(
            "UPDATE conversations SET language_code = ?2 WHERE user_id = ?1",
            params![user_id, language_code],
        )?;
        Ok(())
    }

    /// Atomically apply the menu debounce.
    ///
    /// Returns the updated record when the menu may be rendered, after
    /// stamping `last_menu_shown_at = now`; returns `None` when suppressed.
    pub fn claim_menu(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> rusqlite::Result<Option<ConversationRecord>> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        let Some(mut record) = select_record(&conn, user_id)? else {
            return Ok(None);
        };
        if !should_render_menu(&record, now, cooldown) {
            return Ok(None);
        }
        conn.execute(
            "UPDATE conversations SET last_menu_shown_at = ?2 WHERE user_id = ?1",
            params![user_id, now.timestamp_millis()],
        )?;
        record.last_menu_shown_at = Some(now);
        Ok(Some(record))
    }

    /// Set `source_selected` if it is still false. True only for the caller
    /// that performed the transition.
    pub fn try_mark_source_selected(&self, user_id: i64) -> rusqlite::Result<bool> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        let changed = conn.execute(
            "UPDATE conversations SET source_selected = 1 WHERE user_id = ?1 AND source_selected = 0",
            [user_id],
        )?;
        Ok(changed == 1)
    }

    /// Point `active_chain_id` at a new chain, returning the previous one.
    pub fn replace_active_chain(&self, user_id: i64, chain_id: &str) -> rusqlite::Result<Option<String>> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        let previous: Option<String> = conn.query_row(
            "SELECT active_chain_id FROM conversations WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE conversations SET active_chain_id = ?2 WHERE user_id = ?1",
            params![user_id, chain_id],
        )?;
        Ok(previous)
    }

    /// Clear `active_chain_id` only if it still names `chain_id`.
    pub fn clear_active_chain_if(&self, user_id: i64, chain_id: &str) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "UPDATE conversations SET active_chain_id = NULL WHERE user_id = ?1 AND active_chain_id = ?2",
            params![user_id, chain_id],
        )?;
        Ok(changed == 1)
    }

    /// Clear `active_chain_id` unconditionally, returning what it held.
    pub fn take_active_chain(&self, user_id: i64) -> rusqlite::Result<Option<String>> {
        let conn = self.conn();
        let previous: Option<Option<String>> = conn
            .query_row(
                "SELECT active_chain_id FROM conversations WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        conn.execute(
            "UPDATE conversations SET active_chain_id = NULL WHERE user_id = ?1",
            [user_id],
        )?;
        Ok(previous.flatten())
    }

    pub fn set_thread(&self, user_id: i64, thread_id: i32) -> rusqlite::Result<()> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        conn.execute(
            "UPDATE conversations SET discussion_thread_id = ?2 WHERE user_id = ?1",
            params![user_id, thread_id],
        )?;
        Ok(())
    }

    /// Set the thread only if the record still names `expected`. False when
    /// another caller replaced it first.
    pub fn replace_thread(&self, user_id: i64, expected: Option<i32>, thread_id: i32) -> rusqlite::Result<bool> {
        let conn = self.conn();
        ensure_row(&conn, user_id)?;
        let changed = conn.execute(
            "UPDATE conversations SET discussion_thread_id = ?3
             WHERE user_id = ?1 AND discussion_thread_id IS ?2",
            params![user_id, expected, thread_id],
        )?;
        Ok(changed == 1)
    }

    /// Allocate the next request id. Ids are never reused.
    pub fn next_request_id(&self) -> rusqlite::Result<i64> {
        next_request_id(&self.conn())
    }

    pub fn user_ids(&self) -> rusqlite::Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id FROM conversations ORDER BY user_id")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

fn ensure_row(conn: &Connection, user_id: i64) -> rusqlite::Result<()> {
    conn.execute("INSERT OR IGNORE INTO conversations (user_id) VALUES (?1)", [user_id])?;
    Ok(())
}

fn next_request_id(conn: &Connection) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO counters (name, value) VALUES ('request_id', 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1",
        [],
    )?;
    conn.query_row("SELECT value FROM counters WHERE name = 'request_id'", [], |row| row.get(0))
}

fn select_record(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<ConversationRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM conversations WHERE user_id = ?1"),
        [user_id],
        row_to_record,
    )
    .optional()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let last_menu_ms: Option<i64> = row.get(5)?;
    Ok(ConversationRecord {
        user_id: row.get(0)?,
        full_name: row.get(1)?,
        language_code: row.get(2)?,
        request_id: row.get(3)?,
        source_selected: row.get(4)?,
        last_menu_shown_at: last_menu_ms.and_then(DateTime::from_timestamp_millis),
        active_chain_id: row.get(6)?,
        discussion_thread_id: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn store() -> ConversationStore {
        ConversationStore::in_memory().unwrap()
    }

    #[test]
    fn test_start_conversation_defaults() {
        let store = store();
        let record = store.start_conversation(10, "Alice", "ru").unwrap();
        assert_eq!(record.language_code, "ru");
        assert_eq!(record.full_name, "Alice");
        assert_eq!(record.request_id, Some(1));
        assert!(!record.source_selected);
    }

    #[test]
    fn test_start_conversation_keeps_request_id_and_language() {
        let store = store();
        store.start_conversation(10, "Alice", "ru").unwrap();
        store.set_language(10, "en").unwrap();
        let record = store.start_conversation(10, "Alice", "ru").unwrap();
        assert_eq!(record.request_id, Some(1));
        assert_eq!(record.language_code, "en");
    }

    #[test]
    fn test_request_ids_never_reused() {
        let store = store();
        let a = store.start_conversation(1, "A", "ru").unwrap();
        let b = store.start_conversation(2, "B", "ru").unwrap();
        let c = store.next_request_id().unwrap();
        assert_eq!(a.request_id, Some(1));
        assert_eq!(b.request_id, Some(2));
        assert_eq!(c, 3);
    }

    #[test]
    fn test_start_resets_source_selected() {
        let store = store();
        store.start_conversation(5, "E", "ru").unwrap();
        assert!(store.try_mark_source_selected(5).unwrap());
        let record = store.start_conversation(5, "E", "ru").unwrap();
        assert!(!record.source_selected);
        assert!(store.try_mark_source_selected(5).unwrap());
    }

    #[test]
    fn test_try_mark_source_selected_once() {
        let store = store();
        assert!(store.try_mark_source_selected(3).unwrap());
        assert!(!store.try_mark_source_selected(3).unwrap());
        assert!(store.get(3).unwrap().unwrap().source_selected);
    }

    #[test]
    fn test_try_mark_source_selected_concurrent() {
        let store = Arc::new(store());
        store.start_conversation(9, "Racer", "ru").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.try_mark_source_selected(9).unwrap())
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_claim_menu_debounces() {
        let store = store();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let cooldown = Duration::from_secs(3);

        let first = store.claim_menu(4, t0, cooldown).unwrap();
        assert_eq!(first.unwrap().last_menu_shown_at, Some(t0));
        assert!(store.claim_menu(4, t0 + chrono::Duration::seconds(1), cooldown).unwrap().is_none());
        assert!(store.claim_menu(4, t0 + chrono::Duration::seconds(3), cooldown).unwrap().is_some());
    }

    #[test]
    fn test_active_chain_replace_and_conditional_clear() {
        let store = store();
        assert_eq!(store.replace_active_chain(8, "a").unwrap(), None);
        assert_eq!(store.replace_active_chain(8, "b").unwrap(), Some("a".to_string()));

        // A stale chain must not clobber the newer one
        assert!(!store.clear_active_chain_if(8, "a").unwrap());
        assert_eq!(store.get(8).unwrap().unwrap().active_chain_id.as_deref(), Some("b"));

        assert!(store.clear_active_chain_if(8, "b").unwrap());
        assert_eq!(store.get(8).unwrap().unwrap().active_chain_id, None);
    }

    #[test]
    fn test_take_active_chain() {
        let store = store();
        assert_eq!(store.take_active_chain(11).unwrap(), None);
        store.replace_active_chain(11, "x").unwrap();
        assert_eq!(store.take_active_chain(11).unwrap(), Some("x".to_string()));
        assert_eq!(store.get(11).unwrap().unwrap().active_chain_id, None);
    }

    #[test]
    fn test_set_thread_and_user_ids() {
        let store = store();
        store.set_thread(2, 77).unwrap();
        store.set_language(1, "en").unwrap();
        assert_eq!(store.get(2).unwrap().unwrap().discussion_thread_id, Some(77));
        assert_eq!(store.user_ids().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_replace_thread_is_conditional() {
        let store = store();
        assert!(store.replace_thread(3, None, 10).unwrap());
        assert!(!store.replace_thread(3, None, 11).unwrap());
        assert!(store.replace_thread(3, Some(10), 12).unwrap());
        assert!(!store.replace_thread(3, Some(10), 13).unwrap());
        assert_eq!(store.get(3).unwrap().unwrap().discussion_thread_id, Some(12));
    }

    #[test]
    fn test_open_persists_to_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("conversations.db");
        {
            let store = ConversationStore::open(&path).unwrap();
            store.start_conversation(1, "Disk", "en").unwrap();
        }
        let store = ConversationStore::open(&path).unwrap();
        let record = store.get(1).unwrap().unwrap();
        assert_eq!(record.language_code, "en");
        assert_eq!(record.request_id, Some(1));
    }
}
