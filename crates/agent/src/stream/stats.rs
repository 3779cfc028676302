// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-stream counters. Owned by the stream task, read lock-free by the
//! health surface; snapshots are eventually consistent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::TimeZone;
use serde::Serialize;

/// Live counters for one camera stream.
#[derive(Debug)]
pub struct StreamStats {
    pub camera_id: i64,
    pub frames_processed: AtomicU64,
    pub detections_count: AtomicU64,
    pub errors_count: AtomicU64,
    /// Epoch milliseconds of the last frame pulled; 0 = never.
    pub last_frame_ms: AtomicU64,
    pub connected: AtomicBool,
}

impl StreamStats {
    pub fn new(camera_id: i64) -> Self {
        Self {
            camera_id,
            frames_processed: AtomicU64::new(0),
            detections_count: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_frame_ms = self.last_frame_ms.load(Ordering::Relaxed);
        let last_frame_time = (last_frame_ms > 0)
            .then(|| chrono::Utc.timestamp_millis_opt(last_frame_ms as i64).single())
            .flatten()
            .map(|ts| ts.to_rfc3339());
        StatsSnapshot {
            camera_id: self.camera_id,
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detections_count: self.detections_count.load(Ordering::Relaxed),
            errors_count: self.errors_count.load(Ordering::Relaxed),
            last_frame_time,
            is_connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one stream's counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub camera_id: i64,
    pub frames_processed: u64,
    pub detections_count: u64,
    pub errors_count: u64,
    pub last_frame_time: Option<String>,
    pub is_connected: bool,
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
