//! Points ledger: append-only point-earning events.
//!
//! Totals, levels and leaderboard ranks are always derived from the rows;
//! there is no stored counter to drift.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::activity::UserId;
use crate::catalog::AchievementDefinition;
use crate::error::Result;
use crate::store::{format_instant, parse_instant, EngineDb};

/// Points that make up one level band
pub const POINTS_PER_LEVEL: i64 = 100;

/// Source tag for points awarded by unlocks
pub const ACHIEVEMENT_SOURCE: &str = "achievement";

/// Single entry in the points ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsLedgerEntry {
    #[serde(default)]
    pub id: i64,
    pub user_id: UserId,
    pub amount: i64,
    pub source: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PointsLedgerEntry {
    pub fn new(user_id: UserId, amount: i64, source: &str, description: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id,
            amount,
            source: source.to_string(),
            description: description.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reward entry for unlocking `definition`
    pub fn for_achievement(user_id: UserId, definition: &AchievementDefinition) -> Self {
        Self::new(
            user_id,
            definition.points,
            ACHIEVEMENT_SOURCE,
            format!("Unlocked achievement: {}", definition.name),
        )
        .with_metadata(serde_json::json!({
            "achievement_id": definition.id,
            "rule_type": definition.rule_type.as_str(),
            "category": definition.category.as_str(),
        }))
    }

    pub(crate) fn insert(&self, conn: &Connection) -> rusqlite::Result<i64> {
        let metadata = self.metadata.as_ref().map(|m| m.to_string());
        conn.execute(
            "INSERT INTO points_ledger (user_id, amount, source, description, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.user_id,
                self.amount,
                self.source,
                self.description,
                metadata,
                format_instant(&self.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

/// Level for a point total: floor(total / 100) + 1. Negative totals sit at level 1.
pub fn level_for_points(total_points: i64) -> u32 {
    (total_points.max(0) / POINTS_PER_LEVEL) as u32 + 1
}

/// Position within the current 100-point band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: u32,
    pub next_level: u32,
    pub total_points: i64,
    /// Points earned inside the current band
    pub band_points: i64,
    pub band_size: i64,
    /// 0-100, two decimals
    pub percentage: f64,
}

impl LevelProgress {
    pub fn from_total(total_points: i64) -> Self {
        let level = level_for_points(total_points);
        let band_points = total_points.max(0) % POINTS_PER_LEVEL;
        let raw = band_points as f64 / POINTS_PER_LEVEL as f64 * 100.0;
        Self {
            level,
            next_level: level + 1,
            total_points,
            band_points,
            band_size: POINTS_PER_LEVEL,
            percentage: ((raw * 100.0).round() / 100.0).min(100.0),
        }
    }

    /// Fraction of the band completed (0.0 - 1.0)
    pub fn fraction(&self) -> f64 {
        self.band_points as f64 / self.band_size as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub total_points: i64,
    pub level: u32,
}

/// Sort totals descending (ties by user id) and assign dense ranks from 1
pub fn rank_totals(mut totals: Vec<(UserId, i64)>, limit: usize) -> Vec<LeaderboardEntry> {
    totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut ranked = Vec::with_capacity(totals.len().min(limit));
    let mut rank = 0u32;
    let mut previous: Option<i64> = None;

    for (user_id, total) in totals.into_iter().take(limit) {
        if previous != Some(total) {
            rank += 1;
            previous = Some(total);
        }
        ranked.push(LeaderboardEntry {
            rank,
            user_id,
            total_points: total,
            level: level_for_points(total),
        });
    }

    ranked
}

/// Query side of the ledger
#[derive(Clone)]
pub struct PointsLedger {
    db: Arc<EngineDb>,
}

impl PointsLedger {
    pub fn new(db: Arc<EngineDb>) -> Self {
        Self { db }
    }

    /// Append a point-earning event; returns the new entry id
    pub async fn append(&self, entry: PointsLedgerEntry) -> Result<i64> {
        self.db.execute(move |conn| Ok(entry.insert(conn)?)).await
    }

    pub async fn total_points(&self, user_id: UserId) -> Result<i64> {
        self.db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT COALESCE(SUM(amount), 0) FROM points_ledger WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    pub async fn level(&self, user_id: UserId) -> Result<u32> {
        Ok(level_for_points(self.total_points(user_id).await?))
    }

    pub async fn level_progress(&self, user_id: UserId) -> Result<LevelProgress> {
        Ok(LevelProgress::from_total(self.total_points(user_id).await?))
    }

    /// Entries for a user, newest first
    pub async fn history(&self, user_id: UserId, limit: usize) -> Result<Vec<PointsLedgerEntry>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, amount, source, description, metadata, created_at
                     FROM points_ledger
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let entries = stmt
                    .query_map(params![user_id, limit as i64], |row| {
                        let metadata: Option<String> = row.get(5)?;
                        let created_at: String = row.get(6)?;
                        Ok(PointsLedgerEntry {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            amount: row.get(2)?,
                            source: row.get(3)?,
                            description: row.get(4)?,
                            metadata: metadata.and_then(|json| serde_json::from_str(&json).ok()),
                            created_at: parse_instant(&created_at),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(entries)
            })
            .await
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let totals = self
            .db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, SUM(amount) FROM points_ledger GROUP BY user_id",
                )?;
                let totals = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<(UserId, i64)>>>()?;
                Ok(totals)
            })
            .await?;

        Ok(rank_totals(totals, limit))
    }
}
