// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-safe event queue over an embedded SQLite store.
//!
//! Every state transition commits before it is acknowledged, so a crash
//! mid-drain leaves records `pending` and delivery is at-least-once. The
//! queue serializes all access internally; callers on any task may produce,
//! but draining is expected from exactly one consumer.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::event::{EventKind, NewEvent, QueuedEvent};

/// Delivery attempts before a record becomes terminally `failed`.
pub const MAX_RETRIES: u32 = 5;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    camera_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    data TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    processed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
CREATE TABLE IF NOT EXISTS stats (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL DEFAULT 0
);
";

/// Point-in-time queue counters for heartbeats and the health surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
    pub total_processed: u64,
}

/// Durable FIFO of detection events with bounded retries.
pub struct EventQueue {
    conn: Mutex<Connection>,
    /// Monotonic across restarts; mirrored in the `stats` table.
    processed: AtomicU64,
}

impl EventQueue {
    /// Open (or create) the queue store, creating parent directories and
    /// running migrations. The processed counter is restored from disk.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute("INSERT OR IGNORE INTO stats (key, value) VALUES ('processed_count', 0)", [])?;
        let processed: i64 =
            conn.query_row("SELECT value FROM stats WHERE key = 'processed_count'", [], |row| {
                row.get(0)
            })?;

        tracing::info!(path = %path.display(), "event queue opened");
        Ok(Self { conn: Mutex::new(conn), processed: AtomicU64::new(processed.max(0) as u64) })
    }

    /// Append a pending record. Returns the assigned id.
    pub fn enqueue(&self, event: &NewEvent) -> anyhow::Result<i64> {
        let data = serde_json::to_string(&event.data)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (type, camera_id, timestamp, data) VALUES (?1, ?2, ?3, ?4)",
            params![event.kind.as_str(), event.camera_id, event.timestamp.to_rfc3339(), data],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Up to `batch_size` oldest pending records still under the retry cap.
    /// Records are not leased; the single consumer marks them after delivery.
    pub fn get_pending(&self, batch_size: usize) -> anyhow::Result<Vec<QueuedEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, type, camera_id, timestamp, data, retry_count
             FROM events
             WHERE status = 'pending' AND retry_count < ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![MAX_RETRIES, batch_size as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, kind_raw, camera_id, timestamp, data_raw, retry_count) = row?;
            let Some(kind) = EventKind::parse(&kind_raw) else {
                tracing::warn!(id, kind = %kind_raw, "skipping event with unknown type");
                continue;
            };
            let data = match serde_json::from_str(&data_raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(id, err = %e, "skipping event with undecodable payload");
                    continue;
                }
            };
            events.push(QueuedEvent {
                id,
                kind,
                camera_id,
                timestamp,
                data,
                retry_count: retry_count.max(0) as u32,
            });
        }
        Ok(events)
    }

    /// Transition records to `processed` and bump the monotonic counter.
    ///
    /// All ids must currently be pending; otherwise nothing is changed.
    pub fn mark_processed(&self, ids: &[i64]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Local::now().to_rfc3339();
        let mut changed = 0usize;
        {
            let mut stmt = tx.prepare(
                "UPDATE events SET status = 'processed', processed_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
            )?;
            for id in ids {
                changed += stmt.execute(params![now, id])?;
            }
        }
        if changed != ids.len() {
            // Dropping the transaction rolls back the partial update.
            anyhow::bail!(
                "refusing to mark {} events processed: only {changed} were pending",
                ids.len()
            );
        }
        tx.execute(
            "UPDATE stats SET value = value + ?1 WHERE key = 'processed_count'",
            params![ids.len() as i64],
        )?;
        tx.commit()?;
        self.processed.fetch_add(ids.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Bump retry counts for a failed delivery. Records reaching the retry
    /// cap become terminally `failed`; the rest stay pending for re-drain.
    pub fn mark_failed(&self, ids: &[i64]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE events
             SET retry_count = retry_count + 1,
                 status = CASE WHEN retry_count + 1 >= {MAX_RETRIES} THEN 'failed' ELSE status END
             WHERE id IN ({placeholders}) AND status = 'pending'"
        );
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Delete terminal records older than `days`. Returns the count removed.
    pub fn cleanup_old(&self, days: u32) -> anyhow::Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM events
             WHERE status IN ('processed', 'failed') AND created_at < datetime('now', ?1)",
            params![format!("-{days} days")],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up old terminal events");
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> anyhow::Result<QueueStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM events GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats =
            QueueStats { total_processed: self.processed.load(Ordering::Relaxed), ..Default::default() };
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processed" => stats.processed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Count of records awaiting delivery.
    pub fn pending_count(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM events WHERE status = 'pending'", [], |row| {
                row.get(0)
            })?;
        Ok(count.max(0) as u64)
    }

    /// Total events ever marked processed, surviving restarts.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Durability barrier: block until all committed transitions have been
    /// checkpointed out of the WAL.
    pub fn flush(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |_row| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
