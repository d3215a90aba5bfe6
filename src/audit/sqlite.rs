//! SQLite-backed attempt log.
//! Used by: state, audit.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row};

use super::{AttemptStore, IpSummary, NewAttempt, ViewCountAttempt};
use crate::error::{deadline_err, Result};

const DEFAULT_DEADLINE: Duration = Duration::from_millis(250);

pub struct SqliteAttemptLog {
    conn: Mutex<Connection>,
    deadline: Duration,
}

impl SqliteAttemptLog {
    pub fn open(path: &str, deadline: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(deadline)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS view_count_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id TEXT NOT NULL,
                ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                success INTEGER NOT NULL,
                reason TEXT NOT NULL,
                attempted_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_ip_time
                ON view_count_attempts (ip, attempted_at);
            CREATE INDEX IF NOT EXISTS idx_attempts_time
                ON view_count_attempts (attempted_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            deadline,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", DEFAULT_DEADLINE)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("audit"))?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM view_count_attempts", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, content_id, ip, user_agent, success, reason, attempted_at FROM view_count_attempts";

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<ViewCountAttempt> {
    let millis: i64 = row.get(6)?;
    Ok(ViewCountAttempt {
        id: row.get(0)?,
        content_id: row.get(1)?,
        ip: row.get(2)?,
        user_agent: row.get(3)?,
        success: row.get(4)?,
        reason: row.get(5)?,
        attempted_at: Utc.timestamp_millis_opt(millis).single().unwrap_or_default(),
    })
}

impl AttemptStore for SqliteAttemptLog {
    fn append(&self, attempt: &NewAttempt<'_>) -> Result<i64> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("audit"))?;
        conn.execute(
            "INSERT INTO view_count_attempts
                (content_id, ip, user_agent, success, reason, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                attempt.content_id,
                attempt.ip,
                attempt.user_agent,
                attempt.success,
                attempt.reason,
                attempt.attempted_at.timestamp_millis(),
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ViewCountAttempt>> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("audit"))?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
        let entries = stmt
            .query_map([limit as i64], attempt_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn for_ip(&self, ip: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<ViewCountAttempt>> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("audit"))?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE ip = ?1 AND attempted_at >= ?2 AND attempted_at < ?3 ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map(
                (ip, since.timestamp_millis(), until.timestamp_millis()),
                attempt_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn summarize_by_ip(&self, since: DateTime<Utc>) -> Result<Vec<IpSummary>> {
        let conn = self.conn.try_lock_for(self.deadline).ok_or_else(|| deadline_err("audit"))?;
        let mut stmt = conn.prepare(
            "SELECT ip, COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END)
             FROM view_count_attempts
             WHERE attempted_at >= ?1
             GROUP BY ip",
        )?;
        let rows = stmt
            .query_map([since.timestamp_millis()], |row| {
                Ok(IpSummary {
                    ip: row.get(0)?,
                    total_attempts: row.get::<_, i64>(1)?.max(0) as u64,
                    failed_attempts: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
