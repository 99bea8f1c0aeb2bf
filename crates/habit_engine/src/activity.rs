//! Activity records and habits as the engine sees them.
//!
//! The CRUD layer owns these rows. The engine only reads an
//! [`ActivitySnapshot`] fetched for one user and evaluates it in memory.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type UserId = i64;
pub type HabitId = i64;

/// Completion status of a single logged occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Completed,
    Partial,
    Missed,
    Pending,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Completed => "completed",
            ActivityStatus::Partial => "partial",
            ActivityStatus::Missed => "missed",
            ActivityStatus::Pending => "pending",
        }
    }

    /// Parse a stored status. Unknown values read as pending so they never
    /// count towards completion.
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => ActivityStatus::Completed,
            "partial" => ActivityStatus::Partial,
            "missed" => ActivityStatus::Missed,
            _ => ActivityStatus::Pending,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ActivityStatus::Completed)
    }
}

/// One logged occurrence of a habit on a calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(default)]
    pub id: i64,
    pub user_id: UserId,
    pub habit_id: HabitId,
    /// Calendar date, already resolved to the user's timezone upstream
    pub date: NaiveDate,
    pub status: ActivityStatus,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        user_id: UserId,
        habit_id: HabitId,
        date: NaiveDate,
        status: ActivityStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            habit_id,
            date,
            status,
            payload: serde_json::Value::Null,
            note: None,
            created_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Minimal habit view: ownership and whether it is still being tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Habit {
    pub id: HabitId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Everything the engine needs to know about one user's activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub user_id: UserId,
    /// Ordered by date, then creation instant
    pub records: Vec<ActivityRecord>,
    pub habits: Vec<Habit>,
}

impl ActivitySnapshot {
    pub fn new(user_id: UserId, mut records: Vec<ActivityRecord>, habits: Vec<Habit>) -> Self {
        records.sort_by(|a, b| (a.date, a.created_at).cmp(&(b.date, b.created_at)));
        Self {
            user_id,
            records,
            habits,
        }
    }

    pub fn habit_count(&self) -> u64 {
        let ids: HashSet<HabitId> = self.habits.iter().map(|h| h.id).collect();
        ids.len() as u64
    }

    pub fn active_habit_count(&self) -> u64 {
        let ids: HashSet<HabitId> = self
            .habits
            .iter()
            .filter(|h| h.active)
            .map(|h| h.id)
            .collect();
        ids.len() as u64
    }

    pub fn completed_count(&self) -> u64 {
        self.records.iter().filter(|r| r.status.is_completed()).count() as u64
    }

    /// Records whose date falls inside `[start, end]`
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> Vec<ActivityRecord> {
        self.records
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect()
    }
}
