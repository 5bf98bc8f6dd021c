use std::path::Path;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{coordinate_d_tag, decode_for_ingest, LocalStore, StoreError};

const DB_FILE: &str = "events.db";

/// SQLite-backed event store living in the data directory.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) `<db_dir>/events.db`
    pub fn open<P: AsRef<Path>>(db_dir: P) -> Result<Self, StoreError> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;

        let conn = Connection::open(db_dir.join(DB_FILE))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                kind INTEGER NOT NULL,
                d_tag TEXT,
                created_at INTEGER NOT NULL,
                json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_coordinate
                ON events (kind, pubkey, d_tag, created_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl LocalStore for SqliteStore {
    fn get_by_id(&self, id: &EventId) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let json = conn
            .query_row(
                "SELECT json FROM events WHERE id = ?1",
                params![id.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    fn get_by_coordinate(
        &self,
        kind: u16,
        pubkey: &PublicKey,
        d_tag: &str,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let json = conn
            .query_row(
                "SELECT json FROM events
                 WHERE kind = ?1 AND pubkey = ?2 AND d_tag = ?3
                 ORDER BY created_at DESC LIMIT 1",
                params![kind, pubkey.to_hex(), d_tag],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    fn ingest(&self, json: &str) -> Result<bool, StoreError> {
        let event = decode_for_ingest(json)?;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO events (id, pubkey, kind, d_tag, created_at, json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id.to_hex(),
                event.pubkey.to_hex(),
                event.kind.as_u16(),
                coordinate_d_tag(&event),
                event.created_at.as_secs() as i64,
                event.as_json(),
            ],
        )?;
        Ok(inserted > 0)
    }
}
