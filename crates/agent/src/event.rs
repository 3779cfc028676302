// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared event types: what detectors emit, what the queue stores, and what
//! the cloud receives.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Category of a detection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Attendance,
    Discipline,
    Alert,
    Presence,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attendance => "ATTENDANCE",
            Self::Discipline => "DISCIPLINE",
            Self::Alert => "ALERT",
            Self::Presence => "PRESENCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ATTENDANCE" => Some(Self::Attendance),
            "DISCIPLINE" => Some(Self::Discipline),
            "ALERT" => Some(Self::Alert),
            "PRESENCE" => Some(Self::Presence),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection event about to enter the queue. The timestamp is the wall
/// clock at detection start, offset-aware.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub camera_id: i64,
    pub timestamp: DateTime<FixedOffset>,
    pub data: serde_json::Value,
}

/// A durable event read back from the queue for delivery.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub id: i64,
    pub kind: EventKind,
    pub camera_id: i64,
    /// RFC 3339 with offset, exactly as stored.
    pub timestamp: String,
    pub data: serde_json::Value,
    pub retry_count: u32,
}
