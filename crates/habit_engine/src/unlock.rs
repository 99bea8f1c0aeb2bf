//! Achievement unlock state machine.
//!
//! Per (user, achievement) the only transition is Locked -> Unlocked. The
//! existence check up front is an optimisation; the composite primary key on
//! `unlock_records` is what decides races. The unlock row and its ledger
//! entry are written in one IMMEDIATE transaction so they land together or
//! not at all.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::activity::{ActivitySnapshot, UserId};
use crate::catalog::{AchievementCatalog, AchievementDefinition};
use crate::error::{EngineError, Result};
use crate::ledger::PointsLedgerEntry;
use crate::progress::{Progress, ProgressEvaluator};
use crate::store::{format_instant, parse_instant, ActivityStore, EngineDb};

/// The fact that a user unlocked an achievement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub user_id: UserId,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
    /// Progress value at the moment of unlock
    pub progress_snapshot: u64,
}

impl UnlockRecord {
    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO unlock_records (user_id, achievement_id, unlocked_at, progress_snapshot)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.user_id,
                self.achievement_id,
                format_instant(&self.unlocked_at),
                self.progress_snapshot as i64,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn find(
        conn: &Connection,
        user_id: UserId,
        achievement_id: &str,
    ) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT user_id, achievement_id, unlocked_at, progress_snapshot
             FROM unlock_records WHERE user_id = ?1 AND achievement_id = ?2",
            params![user_id, achievement_id],
            unlock_from_row,
        )
        .optional()
    }

    pub(crate) fn for_user(conn: &Connection, user_id: UserId) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, achievement_id, unlocked_at, progress_snapshot
             FROM unlock_records WHERE user_id = ?1 ORDER BY unlocked_at, achievement_id",
        )?;
        let rows = stmt
            .query_map(params![user_id], unlock_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn unlock_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnlockRecord> {
    let unlocked_at: String = row.get(2)?;
    let snapshot: i64 = row.get(3)?;
    Ok(UnlockRecord {
        user_id: row.get(0)?,
        achievement_id: row.get(1)?,
        unlocked_at: parse_instant(&unlocked_at),
        progress_snapshot: snapshot.max(0) as u64,
    })
}

/// Public fields of a freshly unlocked achievement, for notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockedAchievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub points: i64,
    pub unlocked_at: DateTime<Utc>,
    pub progress: u64,
}

impl UnlockedAchievement {
    fn from_definition(definition: &AchievementDefinition, record: &UnlockRecord) -> Self {
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            points: definition.points,
            unlocked_at: record.unlocked_at,
            progress: record.progress_snapshot,
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// An unlock record exists; nothing was written
    AlreadyUnlocked,
    /// Requirement not met yet; nothing was written
    NotYetUnlocked { progress: Progress },
    /// This call created the unlock (and its ledger entry)
    NewlyUnlocked(UnlockedAchievement),
}

impl UnlockOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, UnlockOutcome::NewlyUnlocked(_))
    }
}

/// One achievement whose evaluation failed; nothing was committed for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockFailure {
    pub achievement_id: String,
    pub code: i32,
    pub error: String,
}

/// Outcome of evaluating a whole catalog for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnlockBatch {
    /// Unlocked by this call, sorted by id
    pub unlocked: Vec<UnlockedAchievement>,
    /// Sorted by achievement id
    pub failed: Vec<UnlockFailure>,
}

impl UnlockBatch {
    pub fn ids(&self) -> Vec<&str> {
        self.unlocked.iter().map(|a| a.id.as_str()).collect()
    }
}

#[derive(Clone)]
pub struct UnlockCoordinator {
    db: Arc<EngineDb>,
    store: ActivityStore,
    evaluator: ProgressEvaluator,
}

impl UnlockCoordinator {
    pub fn new(db: Arc<EngineDb>, evaluator: ProgressEvaluator) -> Self {
        let store = ActivityStore::new(Arc::clone(&db));
        Self {
            db,
            store,
            evaluator,
        }
    }

    pub fn evaluator(&self) -> &ProgressEvaluator {
        &self.evaluator
    }

    /// Unlock records for a user, oldest first
    pub async fn unlocks_for(&self, user_id: UserId) -> Result<Vec<UnlockRecord>> {
        self.db
            .execute(move |conn| Ok(UnlockRecord::for_user(conn, user_id)?))
            .await
    }

    pub async fn find_unlock(
        &self,
        user_id: UserId,
        achievement_id: &str,
    ) -> Result<Option<UnlockRecord>> {
        let achievement_id = achievement_id.to_string();
        self.db
            .execute(move |conn| Ok(UnlockRecord::find(conn, user_id, &achievement_id)?))
            .await
    }

    /// Evaluate one achievement against the user's full history up to `as_of`
    pub async fn evaluate_and_unlock(
        &self,
        user_id: UserId,
        definition: &AchievementDefinition,
        as_of: NaiveDate,
    ) -> Result<UnlockOutcome> {
        let snapshot = self.store.snapshot(user_id, None, as_of).await?;
        self.evaluate_with_snapshot(definition, &snapshot, as_of).await
    }

    /// Evaluate one achievement against an already fetched snapshot
    pub async fn evaluate_with_snapshot(
        &self,
        definition: &AchievementDefinition,
        snapshot: &ActivitySnapshot,
        as_of: NaiveDate,
    ) -> Result<UnlockOutcome> {
        let user_id = snapshot.user_id;

        if self.find_unlock(user_id, &definition.id).await?.is_some() {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        let progress = self.evaluator.progress(definition, snapshot, as_of, None);
        debug!(
            "User {} achievement {}: {}/{}",
            user_id, definition.id, progress.current, progress.required
        );
        if !progress.is_met() {
            return Ok(UnlockOutcome::NotYetUnlocked { progress });
        }

        let record = UnlockRecord {
            user_id,
            achievement_id: definition.id.clone(),
            unlocked_at: Utc::now(),
            progress_snapshot: progress.current,
        };
        let entry = (definition.points > 0)
            .then(|| PointsLedgerEntry::for_achievement(user_id, definition));

        let written = {
            let record = record.clone();
            self.db
                .execute(move |conn| commit_unlock(conn, &record, entry.as_ref()))
                .await?
        };

        if !written {
            debug!(
                "User {} achievement {} lost the unlock race",
                user_id, definition.id
            );
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        info!(
            "User {} unlocked {} (+{} points)",
            user_id, definition.id, definition.points
        );
        Ok(UnlockOutcome::NewlyUnlocked(UnlockedAchievement::from_definition(
            definition, &record,
        )))
    }

    /// Evaluate every active definition concurrently, one task per
    /// achievement. A failed pair is reported in `failed` and does not hide
    /// the unlocks its siblings committed.
    pub async fn evaluate_and_unlock_all(
        &self,
        user_id: UserId,
        catalog: &AchievementCatalog,
        as_of: NaiveDate,
    ) -> Result<UnlockBatch> {
        let snapshot = Arc::new(self.store.snapshot(user_id, None, as_of).await?);
        let mut join_set = JoinSet::new();

        for definition in catalog.active() {
            let coordinator = self.clone();
            let definition = definition.clone();
            let snapshot = Arc::clone(&snapshot);
            join_set.spawn(async move {
                let outcome = coordinator
                    .evaluate_with_snapshot(&definition, &snapshot, as_of)
                    .await;
                (definition.id, outcome)
            });
        }

        let mut batch = UnlockBatch::default();
        while let Some(joined) = join_set.join_next().await {
            let (id, outcome) = joined?;
            match outcome {
                Ok(UnlockOutcome::NewlyUnlocked(achievement)) => batch.unlocked.push(achievement),
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to evaluate achievement {} for user {}: {}", id, user_id, e);
                    batch.failed.push(UnlockFailure {
                        achievement_id: id,
                        code: e.code(),
                        error: e.to_string(),
                    });
                }
            }
        }

        batch.unlocked.sort_by(|a, b| a.id.cmp(&b.id));
        batch.failed.sort_by(|a, b| a.achievement_id.cmp(&b.achievement_id));
        Ok(batch)
    }
}

/// Write the unlock row and optional ledger entry atomically. Returns false
/// when the unlock row already existed.
fn commit_unlock(
    conn: &mut Connection,
    record: &UnlockRecord,
    entry: Option<&PointsLedgerEntry>,
) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Err(e) = record.insert(&tx) {
        let e = EngineError::from(e);
        if e.is_duplicate_key() {
            return Ok(false);
        }
        return Err(e);
    }

    if let Some(entry) = entry {
        entry.insert(&tx)?;
    }

    tx.commit()?;
    Ok(true)
}
