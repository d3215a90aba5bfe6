//! Content items and their view counters.
//!
//! Content is owned by the surrounding site; this module is the port the
//! engine calls through, plus a SQLite table standing in for the site's
//! own storage.

use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{deadline_err, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub id: String,
    /// Public path of the page that displays this item, e.g. `/blog/hello-world/`.
    pub path: String,
    pub view_count: u64,
}

pub trait ContentRepository: Send + Sync {
    fn find(&self, id: &str) -> Result<Option<ContentItem>>;

    /// Adds exactly one view and returns the new count.
    fn increment_views(&self, id: &str) -> Result<u64>;
}

pub struct SqliteContent {
    conn: Mutex<Connection>,
    deadline: Duration,
}

impl SqliteContent {
    pub fn open(path: &str, deadline: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(deadline)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 0
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            deadline,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", Duration::from_millis(250))
    }

    /// Registers an item or updates its path, keeping the existing count.
    pub fn upsert(&self, id: &str, path: &str) -> Result<()> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("content"))?;
        conn.execute(
            "INSERT INTO content (id, path) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET path = excluded.path",
            (id, path),
        )?;
        Ok(())
    }
}

impl ContentRepository for SqliteContent {
    fn find(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("content"))?;
        let item = conn
            .query_row(
                "SELECT id, path, view_count FROM content WHERE id = ?1",
                [id],
                |row| {
                    Ok(ContentItem {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        view_count: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }

    fn increment_views(&self, id: &str) -> Result<u64> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("content"))?;
        let count: Option<i64> = conn
            .query_row(
                "UPDATE content SET view_count = view_count + 1 WHERE id = ?1 RETURNING view_count",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        count
            .map(|c| c.max(0) as u64)
            .ok_or_else(|| Error::NotFound(id.to_owned()))
    }
}
