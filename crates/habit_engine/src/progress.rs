//! Achievement progress: maps a definition and a user's activity to a
//! current value by delegating to the metrics module.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::activity::ActivitySnapshot;
use crate::catalog::{AchievementDefinition, Category, RuleType};
use crate::metrics::{self, Qualifier};
use crate::unlock::UnlockRecord;

/// Progress of one user towards one achievement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub required: u64,
    /// 0-100, two decimals
    pub percentage: f64,
    pub unlocked: bool,
}

impl Progress {
    pub fn new(current: u64, required: u64, unlocked: bool) -> Self {
        Self {
            current,
            required,
            percentage: percentage(current, required),
            unlocked,
        }
    }

    pub fn is_met(&self) -> bool {
        self.required > 0 && self.current >= self.required
    }
}

/// `min(100, round(current / required * 100, 2))`; 0 when nothing is required
pub fn percentage(current: u64, required: u64) -> f64 {
    if required == 0 {
        return 0.0;
    }
    let raw = current as f64 / required as f64 * 100.0;
    ((raw * 100.0).round() / 100.0).min(100.0)
}

/// Rule-specific progress for `special` achievements
pub trait SpecialRule: Send + Sync {
    fn current(&self, snapshot: &ActivitySnapshot, as_of: NaiveDate) -> u64;
}

/// Calendar weeks (ISO, Monday start) with a completed record on every day
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfectWeek;

impl SpecialRule for PerfectWeek {
    fn current(&self, snapshot: &ActivitySnapshot, as_of: NaiveDate) -> u64 {
        let mut days_by_week: HashMap<(i32, u32), BTreeSet<u32>> = HashMap::new();
        for date in metrics::active_dates(&snapshot.records, Qualifier::CompletedOnly) {
            if date > as_of {
                continue;
            }
            let week = date.iso_week();
            days_by_week
                .entry((week.year(), week.week()))
                .or_default()
                .insert(date.weekday().num_days_from_monday());
        }
        days_by_week.values().filter(|days| days.len() == 7).count() as u64
    }
}

/// Registered special rules, keyed by achievement id
#[derive(Clone, Default)]
pub struct SpecialRules {
    rules: HashMap<String, Arc<dyn SpecialRule>>,
}

impl SpecialRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the special entries of the built-in catalog
    pub fn builtin() -> Self {
        Self::new().register("perfect_week", PerfectWeek)
    }

    pub fn register(mut self, achievement_id: &str, rule: impl SpecialRule + 'static) -> Self {
        self.rules.insert(achievement_id.to_string(), Arc::new(rule));
        self
    }

    pub fn get(&self, achievement_id: &str) -> Option<&Arc<dyn SpecialRule>> {
        self.rules.get(achievement_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for SpecialRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.rules.keys().collect();
        ids.sort();
        f.debug_struct("SpecialRules").field("ids", &ids).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressEvaluator {
    special: SpecialRules,
}

impl ProgressEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_special_rules(special: SpecialRules) -> Self {
        Self { special }
    }

    /// Evaluator that can reach every built-in achievement
    pub fn builtin() -> Self {
        Self::with_special_rules(SpecialRules::builtin())
    }

    /// Progress for `definition`. An existing unlock short-circuits to its
    /// stored snapshot.
    pub fn progress(
        &self,
        definition: &AchievementDefinition,
        snapshot: &ActivitySnapshot,
        as_of: NaiveDate,
        unlock: Option<&UnlockRecord>,
    ) -> Progress {
        match unlock {
            Some(record) => Progress::new(record.progress_snapshot, definition.requirement, true),
            None => Progress::new(
                self.current(definition, snapshot, as_of),
                definition.requirement,
                false,
            ),
        }
    }

    /// Current value for `definition`. Unsupported combinations give 0.
    pub fn current(
        &self,
        definition: &AchievementDefinition,
        snapshot: &ActivitySnapshot,
        as_of: NaiveDate,
    ) -> u64 {
        let records = &snapshot.records;
        let value = match (&definition.rule_type, &definition.category) {
            // Longest run of days with a completed record
            (RuleType::Streak, Category::Habits) => {
                Some(u64::from(metrics::longest_streak(records, Qualifier::CompletedOnly)))
            }
            // Live run of days with any record, ending today
            (RuleType::Streak, Category::Logs) => Some(u64::from(metrics::current_streak(
                records,
                as_of,
                Qualifier::AnyStatus,
            ))),
            (RuleType::Count | RuleType::Milestone, category) => count_for(category, snapshot),
            (RuleType::Special, _) => Some(
                self.special
                    .get(&definition.id)
                    .map(|rule| rule.current(snapshot, as_of))
                    .unwrap_or(0),
            ),
            _ => None,
        };

        value.unwrap_or_else(|| {
            warn!(
                "Achievement {} has unsupported rule {}/{}, treating as unreachable",
                definition.id,
                definition.rule_type.as_str(),
                definition.category.as_str()
            );
            0
        })
    }
}

fn count_for(category: &Category, snapshot: &ActivitySnapshot) -> Option<u64> {
    match category {
        Category::Habits => Some(snapshot.habit_count()),
        Category::Logs => Some(snapshot.records.len() as u64),
        Category::CompletedLogs => Some(snapshot.completed_count()),
        Category::DaysActive => {
            Some(metrics::active_dates(&snapshot.records, Qualifier::AnyStatus).len() as u64)
        }
        Category::Unknown(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityRecord, ActivityStatus, Habit};
    use chrono::{Duration, TimeZone, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 16).unwrap() // Sunday
    }

    fn rec(offset: i64, habit: i64, status: ActivityStatus) -> ActivityRecord {
        let date = today() + Duration::days(offset);
        let created = Utc.from_utc_datetime(&date.and_hms_opt(8, 0, 0).unwrap());
        ActivityRecord::new(1, habit, date, status, created)
    }

    fn habit(id: i64) -> Habit {
        Habit { id, user_id: 1, name: format!("habit {}", id), active: true }
    }

    fn def(rule: RuleType, category: Category, requirement: u64) -> AchievementDefinition {
        AchievementDefinition::new("test", "Test", "", rule, category, requirement, 10)
    }

    fn snapshot() -> ActivitySnapshot {
        ActivitySnapshot::new(
            1,
            vec![
                rec(-6, 1, ActivityStatus::Completed),
                rec(-5, 1, ActivityStatus::Completed),
                rec(-4, 1, ActivityStatus::Completed),
                rec(-2, 2, ActivityStatus::Missed),
                rec(-1, 2, ActivityStatus::Partial),
                rec(0, 1, ActivityStatus::Completed),
                rec(0, 2, ActivityStatus::Completed),
            ],
            vec![habit(1), habit(2)],
        )
    }

    #[test]
    fn test_percentage_rounding_and_clamp() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(5, 5), 100.0);
        assert_eq!(percentage(12, 5), 100.0);
        assert_eq!(percentage(3, 0), 0.0);
    }

    #[test]
    fn test_percentage_monotonic() {
        let mut last = 0.0;
        for current in 0..40 {
            let p = percentage(current, 17);
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_streak_categories_take_distinct_paths() {
        let evaluator = ProgressEvaluator::new();
        let snap = snapshot();

        // Completed days: -6,-5,-4,0 -> longest 3
        let habits = evaluator.current(&def(RuleType::Streak, Category::Habits, 3), &snap, today());
        assert_eq!(habits, 3);

        // Any-status days: -2,-1,0 -> current 3
        let logs = evaluator.current(&def(RuleType::Streak, Category::Logs, 3), &snap, today());
        assert_eq!(logs, 3);

        // Same data, one day later: current any-status streak is broken
        let tomorrow = today() + Duration::days(1);
        let logs = evaluator.current(&def(RuleType::Streak, Category::Logs, 3), &snap, tomorrow);
        assert_eq!(logs, 0);
    }

    #[test]
    fn test_count_and_milestone_share_math() {
        let evaluator = ProgressEvaluator::new();
        let snap = snapshot();
        for rule in [RuleType::Count, RuleType::Milestone] {
            let current = |category: Category| {
                evaluator.current(&def(rule.clone(), category, 1), &snap, today())
            };
            assert_eq!(current(Category::Habits), 2);
            assert_eq!(current(Category::Logs), 7);
            assert_eq!(current(Category::CompletedLogs), 5);
            assert_eq!(current(Category::DaysActive), 6);
        }
    }

    #[test]
    fn test_unsupported_combinations_are_unreachable() {
        let evaluator = ProgressEvaluator::new();
        let snap = snapshot();
        let cases = [
            def(RuleType::Streak, Category::CompletedLogs, 1),
            def(RuleType::Count, Category::Unknown("friends".into()), 1),
            def(RuleType::Unknown("combo".into()), Category::Logs, 1),
        ];
        for case in &cases {
            assert_eq!(evaluator.current(case, &snap, today()), 0);
        }
    }

    #[test]
    fn test_special_without_rule_is_zero() {
        let evaluator = ProgressEvaluator::new();
        let special = def(RuleType::Special, Category::Habits, 1);
        assert_eq!(evaluator.current(&special, &snapshot(), today()), 0);
    }

    #[test]
    fn test_perfect_week_rule() {
        // Monday 2024-06-10 .. Sunday 2024-06-16
        let records: Vec<_> = (-6..=0).map(|o| rec(o, 1, ActivityStatus::Completed)).collect();
        let snap = ActivitySnapshot::new(1, records, vec![habit(1)]);

        let rules = SpecialRules::new().register("test", PerfectWeek);
        let evaluator = ProgressEvaluator::with_special_rules(rules);
        let special = def(RuleType::Special, Category::Habits, 1);
        assert_eq!(evaluator.current(&special, &snap, today()), 1);

        // Evaluated before the week is complete
        let saturday = today() - Duration::days(1);
        assert_eq!(evaluator.current(&special, &snap, saturday), 0);
    }

    #[test]
    fn test_unlocked_returns_snapshot() {
        let evaluator = ProgressEvaluator::new();
        let definition = def(RuleType::Count, Category::Logs, 5);
        let record = UnlockRecord {
            user_id: 1,
            achievement_id: "test".into(),
            unlocked_at: Utc::now(),
            progress_snapshot: 5,
        };
        let progress = evaluator.progress(&definition, &snapshot(), today(), Some(&record));
        assert!(progress.unlocked);
        assert_eq!(progress.current, 5);
        assert_eq!(progress.percentage, 100.0);

        let fresh = evaluator.progress(&definition, &snapshot(), today(), None);
        assert!(!fresh.unlocked);
        assert_eq!(fresh.current, 7);
        assert!(fresh.is_met());
    }
}
