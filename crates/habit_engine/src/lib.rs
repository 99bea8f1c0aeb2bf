//! Habit Engine - analytics, achievements and points over habit activity.
//!
//! Turns an append-only stream of dated activity records into streaks,
//! regularity metrics, one-time achievement unlocks and a points ledger.

pub mod activity;
pub mod analytics;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod progress;
pub mod store;
pub mod unlock;

pub use activity::{ActivityRecord, ActivitySnapshot, ActivityStatus, Habit, HabitId, UserId};
pub use analytics::{AnalyticsReport, NoiseSource, Prediction, Recommendation};
pub use catalog::{AchievementCatalog, AchievementDefinition, Category, RuleType};
pub use config::EngineConfig;
pub use engine::{AchievementStatus, Engine, PointsHistory};
pub use error::{EngineError, Result};
pub use ledger::{LeaderboardEntry, LevelProgress, PointsLedger, PointsLedgerEntry};
pub use metrics::{DateWindow, Denominator, Qualifier, Trend};
pub use progress::{PerfectWeek, Progress, ProgressEvaluator, SpecialRule, SpecialRules};
pub use store::DbLocation;
pub use unlock::{
    UnlockBatch, UnlockCoordinator, UnlockFailure, UnlockOutcome, UnlockRecord, UnlockedAchievement,
};
