//! Engine facade: one handle over storage, metrics, unlocks and points.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::activity::{ActivityRecord, Habit, UserId};
use crate::analytics::{self, AnalyticsReport, NoiseSource};
use crate::catalog::{default_definitions, AchievementCatalog, AchievementDefinition, Category};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{LeaderboardEntry, LevelProgress, PointsLedger, PointsLedgerEntry};
use crate::progress::{Progress, ProgressEvaluator};
use crate::store::{ActivityStore, CatalogStore, EngineDb};
use crate::unlock::{UnlockBatch, UnlockCoordinator, UnlockOutcome};

/// One catalog entry annotated with a user's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementStatus {
    pub definition: AchievementDefinition,
    pub progress: Progress,
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsHistory {
    /// Newest first
    pub entries: Vec<PointsLedgerEntry>,
    pub total_points: i64,
    pub level_progress: LevelProgress,
}

pub struct Engine {
    config: EngineConfig,
    db: Arc<EngineDb>,
    activity: ActivityStore,
    catalog: CatalogStore,
    unlocks: UnlockCoordinator,
    ledger: PointsLedger,
    noise: Mutex<NoiseSource>,
}

impl Engine {
    pub async fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_evaluator(config, ProgressEvaluator::builtin()).await
    }

    /// Open with a custom evaluator, e.g. one with special rules registered
    pub async fn open_with_evaluator(
        config: EngineConfig,
        evaluator: ProgressEvaluator,
    ) -> Result<Self> {
        let db = Arc::new(EngineDb::open(config.storage.location()).await?);
        let engine = Self {
            activity: ActivityStore::new(Arc::clone(&db)),
            catalog: CatalogStore::new(Arc::clone(&db)),
            unlocks: UnlockCoordinator::new(Arc::clone(&db), evaluator),
            ledger: PointsLedger::new(Arc::clone(&db)),
            noise: Mutex::new(NoiseSource::from_settings(&config.prediction)),
            config,
            db,
        };

        if engine.config.storage.seed_builtin_catalog {
            engine.seed_catalog().await?;
        }

        info!("Habit engine ready ({:?})", engine.db.location());
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    /// Insert the built-in definitions that are missing
    pub async fn seed_catalog(&self) -> Result<usize> {
        self.catalog.seed(default_definitions()).await
    }

    pub async fn catalog(&self) -> Result<AchievementCatalog> {
        self.catalog.load().await
    }

    pub async fn upsert_definition(&self, definition: AchievementDefinition) -> Result<()> {
        self.catalog.upsert(definition).await
    }

    pub async fn import(&self, habits: Vec<Habit>, records: Vec<ActivityRecord>) -> Result<usize> {
        self.activity.import(habits, records).await
    }

    /// Analytics over the configured history and window ending on `as_of`
    pub async fn analytics(&self, user_id: UserId, as_of: NaiveDate) -> Result<AnalyticsReport> {
        let settings = &self.config.analytics;
        let since = as_of - Duration::days(i64::from(settings.effective_history_days()) - 1);
        let snapshot = self.activity.snapshot(user_id, Some(since), as_of).await?;

        let mut noise = self.noise.lock().await;
        Ok(analytics::build_report(&snapshot, as_of, settings, &mut noise))
    }

    /// Active catalog with progress, optionally limited to one category
    pub async fn achievements(
        &self,
        user_id: UserId,
        as_of: NaiveDate,
        category: Option<&Category>,
    ) -> Result<Vec<AchievementStatus>> {
        let catalog = self.catalog.load().await?;
        let snapshot = self.activity.snapshot(user_id, None, as_of).await?;
        let unlocked: HashMap<String, _> = self
            .unlocks
            .unlocks_for(user_id)
            .await?
            .into_iter()
            .map(|record| (record.achievement_id.clone(), record))
            .collect();

        let definitions = match category {
            Some(category) => catalog.by_category(category),
            None => catalog.active(),
        };

        let evaluator = self.unlocks.evaluator();
        Ok(definitions
            .into_iter()
            .map(|definition| {
                let record = unlocked.get(&definition.id);
                AchievementStatus {
                    definition: definition.clone(),
                    progress: evaluator.progress(definition, &snapshot, as_of, record),
                    unlocked_at: record.map(|r| r.unlocked_at),
                }
            })
            .collect())
    }

    /// Evaluate every active achievement; reports the ones unlocked by this
    /// call and the ones that failed
    pub async fn check_achievements(
        &self,
        user_id: UserId,
        as_of: NaiveDate,
    ) -> Result<UnlockBatch> {
        let catalog = self.catalog.load().await?;
        let batch = self
            .unlocks
            .evaluate_and_unlock_all(user_id, &catalog, as_of)
            .await?;
        if !batch.unlocked.is_empty() {
            info!("User {} unlocked {} achievements", user_id, batch.unlocked.len());
        }
        if !batch.failed.is_empty() {
            warn!("User {}: {} achievements failed to evaluate", user_id, batch.failed.len());
        }
        Ok(batch)
    }

    /// Evaluate a single achievement by id
    pub async fn check_achievement(
        &self,
        user_id: UserId,
        achievement_id: &str,
        as_of: NaiveDate,
    ) -> Result<UnlockOutcome> {
        let catalog = self.catalog.load().await?;
        let definition = catalog
            .get(achievement_id)
            .filter(|d| d.is_evaluable())
            .ok_or_else(|| {
                EngineError::Catalog(format!("No active achievement named {}", achievement_id))
            })?;
        self.unlocks
            .evaluate_and_unlock(user_id, definition, as_of)
            .await
    }

    pub async fn points_history(&self, user_id: UserId, limit: usize) -> Result<PointsHistory> {
        let entries = self.ledger.history(user_id, limit).await?;
        let total_points = self.ledger.total_points(user_id).await?;
        Ok(PointsHistory {
            entries,
            total_points,
            level_progress: LevelProgress::from_total(total_points),
        })
    }

    /// Top users by points; `None` uses the configured default size
    pub async fn leaderboard(&self, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>> {
        let limit = self.config.leaderboard.effective_limit(limit);
        self.ledger.leaderboard(limit).await
    }
}
