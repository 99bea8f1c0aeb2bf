//! Per-user analytics report.
//!
//! Built from one activity snapshot and an explicit `as_of` date, so the
//! same inputs (and the same noise seed) always give the same report.

use chrono::{Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityRecord, ActivitySnapshot, HabitId, UserId};
use crate::config::{AnalyticsSettings, PredictionSettings};
use crate::metrics::{self, DateWindow, Denominator, Qualifier, Trend, WeekdayStat};

/// Completion rate below which completion advice is given
pub const COMPLETION_ADVICE_THRESHOLD: f64 = 0.70;
/// Consistency score below which regularity advice is given
pub const CONSISTENCY_ADVICE_THRESHOLD: f64 = 0.6;
/// Active habit count below which more habits are suggested
pub const MIN_ACTIVE_HABITS: u64 = 3;

/// Days of recent activity a prediction starts from
const PREDICTION_DAYS: u32 = 7;
/// Shift applied to a prediction for an improving or declining trend
const TREND_NUDGE: f64 = 0.05;

/// Bounded jitter for predictions.
///
/// A fixed seed makes the sequence reproducible; amplitude 0 disables it.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: StdRng,
    amplitude: f64,
}

impl NoiseSource {
    pub fn new(amplitude: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            amplitude: amplitude.abs(),
        }
    }

    pub fn from_settings(settings: &PredictionSettings) -> Self {
        Self::new(settings.effective_noise_amplitude(), settings.seed)
    }

    /// No jitter at all
    pub fn none() -> Self {
        Self::new(0.0, Some(0))
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    /// A value in `[-amplitude, amplitude]`
    pub fn sample(&mut self) -> f64 {
        if self.amplitude == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.amplitude..=self.amplitude)
    }
}

/// Advice attached to a report. Serialized as `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecommendationText", try_from = "RecommendationText")]
pub enum Recommendation {
    ImproveCompletion,
    ImproveConsistency,
    ConsiderMoreHabits,
}

impl Recommendation {
    pub fn code(&self) -> &'static str {
        match self {
            Recommendation::ImproveCompletion => "improve_completion",
            Recommendation::ImproveConsistency => "improve_consistency",
            Recommendation::ConsiderMoreHabits => "consider_more_habits",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "improve_completion" => Some(Recommendation::ImproveCompletion),
            "improve_consistency" => Some(Recommendation::ImproveConsistency),
            "consider_more_habits" => Some(Recommendation::ConsiderMoreHabits),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Recommendation::ImproveCompletion => {
                "Try to complete your habits more often to build momentum"
            }
            Recommendation::ImproveConsistency => {
                "Log your habits at a regular time each day to improve consistency"
            }
            Recommendation::ConsiderMoreHabits => {
                "Consider adding more habits to track a fuller routine"
            }
        }
    }
}

/// Expected completion rate for the coming days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_completion_rate: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitAnalytics {
    pub habit_id: HabitId,
    pub name: String,
    /// Days with a completion over days in the window
    pub completion_rate: f64,
    pub current_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub user_id: UserId,
    pub as_of: NaiveDate,
    pub window: DateWindow,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Completed over logged records inside the window
    pub completion_rate: f64,
    pub consistency_score: f64,
    pub trend: Trend,
    pub confidence: f64,
    pub active_habits: u64,
    pub total_records: u64,
    pub best_weekday: Option<Weekday>,
    pub weekdays: Vec<WeekdayStat>,
    pub habits: Vec<HabitAnalytics>,
    pub prediction: Prediction,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Serialize, Deserialize)]
struct RecommendationText {
    code: String,
    message: String,
}

impl From<Recommendation> for RecommendationText {
    fn from(rec: Recommendation) -> Self {
        Self {
            code: rec.code().to_string(),
            message: rec.message().to_string(),
        }
    }
}

impl TryFrom<RecommendationText> for Recommendation {
    type Error = String;

    fn try_from(text: RecommendationText) -> std::result::Result<Self, Self::Error> {
        Recommendation::from_code(&text.code)
            .ok_or_else(|| format!("unknown recommendation code: {}", text.code))
    }
}

/// Build the report for `snapshot` as of `as_of`.
///
/// Streaks look at the whole snapshot (the caller bounds it by history
/// days); rates, consistency and trend only at the trailing window.
pub fn build_report(
    snapshot: &ActivitySnapshot,
    as_of: NaiveDate,
    settings: &AnalyticsSettings,
    noise: &mut NoiseSource,
) -> AnalyticsReport {
    let window = DateWindow::trailing(as_of, settings.effective_window_days());
    let history: Vec<ActivityRecord> = snapshot
        .records
        .iter()
        .filter(|r| r.date <= as_of)
        .cloned()
        .collect();
    let recent = snapshot.within(window.start, window.end);

    let streaks = metrics::streak_summary(&history, as_of, Qualifier::CompletedOnly);
    let completion_rate = metrics::completion_rate(&recent, window, Denominator::LoggedRecords);
    let consistency_score = metrics::consistency_score(&recent);
    let trend = metrics::trend(&recent);
    let confidence = metrics::confidence_level(&recent);
    let active_habits = snapshot.active_habit_count();

    let habits = snapshot
        .habits
        .iter()
        .map(|habit| {
            let own: Vec<ActivityRecord> = history
                .iter()
                .filter(|r| r.habit_id == habit.id)
                .cloned()
                .collect();
            HabitAnalytics {
                habit_id: habit.id,
                name: habit.name.clone(),
                completion_rate: round2(metrics::completion_rate(
                    &own,
                    window,
                    Denominator::CalendarDays,
                )),
                current_streak: metrics::current_streak(&own, as_of, Qualifier::CompletedOnly),
            }
        })
        .collect();

    let prediction = predict(&recent, as_of, trend, confidence, noise);

    AnalyticsReport {
        user_id: snapshot.user_id,
        as_of,
        window,
        current_streak: streaks.current,
        longest_streak: streaks.longest,
        completion_rate: round2(completion_rate),
        consistency_score: round2(consistency_score),
        trend,
        confidence,
        active_habits,
        total_records: recent.len() as u64,
        best_weekday: metrics::best_weekday(&recent),
        weekdays: metrics::weekday_breakdown(&recent),
        habits,
        prediction,
        recommendations: recommendations(completion_rate, consistency_score, active_habits),
    }
}

/// Threshold-based advice, in a fixed order
pub fn recommendations(
    completion_rate: f64,
    consistency_score: f64,
    active_habits: u64,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if completion_rate < COMPLETION_ADVICE_THRESHOLD {
        out.push(Recommendation::ImproveCompletion);
    }
    if consistency_score < CONSISTENCY_ADVICE_THRESHOLD {
        out.push(Recommendation::ImproveConsistency);
    }
    if active_habits < MIN_ACTIVE_HABITS {
        out.push(Recommendation::ConsiderMoreHabits);
    }
    out
}

fn predict(
    records: &[ActivityRecord],
    as_of: NaiveDate,
    trend: Trend,
    confidence: f64,
    noise: &mut NoiseSource,
) -> Prediction {
    let last_week = DateWindow::new(as_of - Duration::days(i64::from(PREDICTION_DAYS) - 1), as_of);
    let base = metrics::completion_rate(records, last_week, Denominator::LoggedRecords);

    let nudge = match trend {
        Trend::Improving => TREND_NUDGE,
        Trend::Declining => -TREND_NUDGE,
        Trend::Stable | Trend::InsufficientData => 0.0,
    };

    let predicted = (base + nudge + noise.sample()).clamp(0.0, 1.0);
    Prediction {
        predicted_completion_rate: round2(predicted),
        confidence,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityStatus, Habit};
    use chrono::{TimeZone, Utc};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap() // Sunday
    }

    fn rec(offset: i64, habit: HabitId, status: ActivityStatus) -> ActivityRecord {
        let date = as_of() - Duration::days(offset);
        let created = Utc.from_utc_datetime(&date.and_hms_opt(7, 30, 0).unwrap());
        ActivityRecord::new(1, habit, date, status, created)
    }

    fn habit(id: HabitId, active: bool) -> Habit {
        Habit { id, user_id: 1, name: format!("habit {}", id), active }
    }

    #[test]
    fn test_empty_snapshot_report() {
        let snapshot = ActivitySnapshot::new(1, Vec::new(), Vec::new());
        let report = build_report(
            &snapshot,
            as_of(),
            &AnalyticsSettings::default(),
            &mut NoiseSource::none(),
        );

        assert_eq!(report.current_streak, 0);
        assert_eq!(report.longest_streak, 0);
        assert_eq!(report.completion_rate, 0.0);
        assert_eq!(report.consistency_score, 0.0);
        assert_eq!(report.trend, Trend::InsufficientData);
        assert_eq!(report.confidence, 0.3);
        assert_eq!(report.total_records, 0);
        assert_eq!(report.best_weekday, None);
        assert_eq!(report.prediction.predicted_completion_rate, 0.0);
        assert!(report.habits.is_empty());
        assert_eq!(
            report.recommendations,
            vec![
                Recommendation::ImproveCompletion,
                Recommendation::ImproveConsistency,
                Recommendation::ConsiderMoreHabits,
            ]
        );
    }

    #[test]
    fn test_daily_routine_report() {
        // Two habits, both completed every day at the same time for 14 days
        let mut records = Vec::new();
        for offset in 0..14 {
            records.push(rec(offset, 1, ActivityStatus::Completed));
            records.push(rec(offset, 2, ActivityStatus::Completed));
        }
        let habits = vec![habit(1, true), habit(2, true), habit(3, true), habit(4, false)];
        let snapshot = ActivitySnapshot::new(1, records, habits);
        let report = build_report(
            &snapshot,
            as_of(),
            &AnalyticsSettings::default(),
            &mut NoiseSource::none(),
        );

        assert_eq!(report.current_streak, 14);
        assert_eq!(report.longest_streak, 14);
        assert_eq!(report.completion_rate, 1.0);
        assert_eq!(report.trend, Trend::Stable);
        assert_eq!(report.confidence, 0.6);
        assert_eq!(report.active_habits, 3);
        assert_eq!(report.total_records, 28);
        assert_eq!(report.prediction.predicted_completion_rate, 1.0);

        // Same-day pairs give zero-length intervals, so the score is only moderate
        assert!(report.consistency_score > 0.0 && report.consistency_score < 1.0);

        let first = &report.habits[0];
        assert_eq!(first.current_streak, 14);
        assert_eq!(first.completion_rate, round2(14.0 / 30.0));
        assert_eq!(report.habits[2].completion_rate, 0.0);
    }

    #[test]
    fn test_records_after_as_of_are_ignored() {
        let records = vec![
            rec(0, 1, ActivityStatus::Completed),
            rec(-1, 1, ActivityStatus::Missed),
        ];
        let snapshot = ActivitySnapshot::new(1, records, vec![habit(1, true)]);
        let report = build_report(
            &snapshot,
            as_of(),
            &AnalyticsSettings::default(),
            &mut NoiseSource::none(),
        );
        assert_eq!(report.total_records, 1);
        assert_eq!(report.completion_rate, 1.0);
        assert_eq!(report.current_streak, 1);
    }

    #[test]
    fn test_declining_trend_nudges_prediction_down() {
        // Older week all completed, recent week half missed
        let mut records = Vec::new();
        for offset in 7..14 {
            records.push(rec(offset, 1, ActivityStatus::Completed));
        }
        for offset in 0..7 {
            let status = if offset % 2 == 0 {
                ActivityStatus::Missed
            } else {
                ActivityStatus::Completed
            };
            records.push(rec(offset, 1, status));
        }
        let snapshot = ActivitySnapshot::new(1, records, vec![habit(1, true)]);
        let report = build_report(
            &snapshot,
            as_of(),
            &AnalyticsSettings::default(),
            &mut NoiseSource::none(),
        );

        assert_eq!(report.trend, Trend::Declining);
        // 3 of 7 completed last week, minus the decline nudge
        assert_eq!(report.prediction.predicted_completion_rate, round2(3.0 / 7.0 - 0.05));
    }

    #[test]
    fn test_noise_is_seeded_and_bounded() {
        let mut a = NoiseSource::new(0.05, Some(42));
        let mut b = NoiseSource::new(0.05, Some(42));
        for _ in 0..100 {
            let x = a.sample();
            assert_eq!(x, b.sample());
            assert!((-0.05..=0.05).contains(&x));
        }

        let mut silent = NoiseSource::none();
        assert_eq!(silent.amplitude(), 0.0);
        assert_eq!(silent.sample(), 0.0);
    }

    #[test]
    fn test_prediction_stays_in_unit_range() {
        let records: Vec<_> = (0..7).map(|o| rec(o, 1, ActivityStatus::Completed)).collect();
        let snapshot = ActivitySnapshot::new(1, records, vec![habit(1, true)]);
        let mut noise = NoiseSource::new(0.25, Some(9));
        for _ in 0..50 {
            let report =
                build_report(&snapshot, as_of(), &AnalyticsSettings::default(), &mut noise);
            let p = report.prediction.predicted_completion_rate;
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_recommendations_serialize_with_text() {
        let json = serde_json::to_value(Recommendation::ImproveConsistency).unwrap();
        assert_eq!(json["code"], "improve_consistency");
        assert_eq!(
            json["message"],
            "Log your habits at a regular time each day to improve consistency"
        );

        let back: Recommendation = serde_json::from_value(json).unwrap();
        assert_eq!(back, Recommendation::ImproveConsistency);

        let unknown = serde_json::json!({"code": "sleep_more", "message": ""});
        assert!(serde_json::from_value::<Recommendation>(unknown).is_err());
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert!(recommendations(0.70, 0.6, 3).is_empty());
        assert_eq!(recommendations(0.69, 0.9, 5), vec![Recommendation::ImproveCompletion]);
        assert_eq!(recommendations(0.9, 0.59, 5), vec![Recommendation::ImproveConsistency]);
        assert_eq!(recommendations(0.9, 0.9, 2), vec![Recommendation::ConsiderMoreHabits]);
    }
}
