//! Streak, rate and regularity metrics over activity records.
//!
//! Every function here is pure: it takes a borrowed slice, never mutates it,
//! and returns a defined value for empty or degenerate input. Callers pick
//! the [`Qualifier`] and [`Denominator`] explicitly because different
//! surfaces count differently.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityRecord;

/// Records needed before a trend is reported
pub const TREND_MIN_RECORDS: usize = 7;
/// Size of the recent and older trend windows
pub const TREND_WINDOW: usize = 7;
/// Completion-rate delta that separates improving/declining from stable
pub const TREND_THRESHOLD: f64 = 0.1;

/// Which records make a date "active"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    /// Any logged record, whatever its status
    AnyStatus,
    /// Only records with status completed
    CompletedOnly,
}

impl Qualifier {
    pub fn accepts(&self, record: &ActivityRecord) -> bool {
        match self {
            Qualifier::AnyStatus => true,
            Qualifier::CompletedOnly => record.status.is_completed(),
        }
    }
}

/// What a completion rate is divided by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denominator {
    /// Completed records over all records logged in the window
    LoggedRecords,
    /// Days with a completed record over calendar days in the window
    CalendarDays,
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` calendar days ending on `as_of` (inclusive)
    pub fn trailing(as_of: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: as_of - Duration::days(span),
            end: as_of,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered; 0 for an inverted window
    pub fn len_days(&self) -> u64 {
        let days = (self.end - self.start).num_days() + 1;
        days.max(0) as u64
    }
}

/// Streak figures for one qualifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSummary {
    /// Consecutive active days ending on the evaluation date
    pub current: u32,
    /// Longest run of consecutive active days ever
    pub longest: u32,
    /// Distinct active dates
    pub active_days: u32,
}

/// Trend classification from comparing recent and older completion rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Improving,
    Declining,
    Stable,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::InsufficientData => "insufficient_data",
            Trend::Improving => "improving",
            Trend::Declining => "declining",
            Trend::Stable => "stable",
        }
    }
}

/// Per-weekday record counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdayStat {
    pub weekday: Weekday,
    pub completed: u64,
    pub total: u64,
}

/// Distinct dates with at least one qualifying record
pub fn active_dates(records: &[ActivityRecord], qualifier: Qualifier) -> BTreeSet<NaiveDate> {
    records
        .iter()
        .filter(|r| qualifier.accepts(r))
        .map(|r| r.date)
        .collect()
}

/// Consecutive active days walking back from `as_of`. Zero when `as_of`
/// itself is inactive.
pub fn current_streak(records: &[ActivityRecord], as_of: NaiveDate, qualifier: Qualifier) -> u32 {
    let dates = active_dates(records, qualifier);
    let mut streak = 0u32;
    let mut day = as_of;

    while dates.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }

    streak
}

/// Longest run of consecutive active days
pub fn longest_streak(records: &[ActivityRecord], qualifier: Qualifier) -> u32 {
    let dates = active_dates(records, qualifier);
    let mut best = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;

    for date in dates {
        run = match prev {
            Some(p) if p.succ_opt() == Some(date) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(date);
    }

    best
}

pub fn streak_summary(
    records: &[ActivityRecord],
    as_of: NaiveDate,
    qualifier: Qualifier,
) -> StreakSummary {
    StreakSummary {
        current: current_streak(records, as_of, qualifier),
        longest: longest_streak(records, qualifier),
        active_days: active_dates(records, qualifier).len() as u32,
    }
}

/// Completion rate inside `window`, in `[0, 1]`. A zero denominator gives 0.
pub fn completion_rate(
    records: &[ActivityRecord],
    window: DateWindow,
    denominator: Denominator,
) -> f64 {
    let in_window: Vec<&ActivityRecord> =
        records.iter().filter(|r| window.contains(r.date)).collect();

    let (numerator, denom) = match denominator {
        Denominator::LoggedRecords => {
            let completed = in_window.iter().filter(|r| r.status.is_completed()).count();
            (completed as u64, in_window.len() as u64)
        }
        Denominator::CalendarDays => {
            let days: BTreeSet<NaiveDate> = in_window
                .iter()
                .filter(|r| r.status.is_completed())
                .map(|r| r.date)
                .collect();
            (days.len() as u64, window.len_days())
        }
    };

    ratio(numerator, denom)
}

/// Regularity of completed activity in `[0, 1]`.
///
/// Uses the hours between consecutive completed records (by creation
/// instant): `1 / (1 + stddev / mean)`. Evenly spaced completions score 1.
pub fn consistency_score(records: &[ActivityRecord]) -> f64 {
    let mut instants: Vec<_> = records
        .iter()
        .filter(|r| r.status.is_completed())
        .map(|r| r.created_at)
        .collect();

    if instants.len() < 2 {
        return 0.0;
    }
    instants.sort();

    let intervals: Vec<f64> = instants
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64 / 3600.0)
        .collect();

    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    let score = 1.0 / (1.0 + variance.sqrt() / mean);
    score.clamp(0.0, 1.0)
}

/// Compare the 7 most recent records against the 7 before them
pub fn trend(records: &[ActivityRecord]) -> Trend {
    if records.len() < TREND_MIN_RECORDS {
        return Trend::InsufficientData;
    }

    let mut by_recency: Vec<&ActivityRecord> = records.iter().collect();
    by_recency.sort_by(|a, b| (b.date, b.created_at).cmp(&(a.date, a.created_at)));

    let recent = &by_recency[..TREND_WINDOW];
    let older_end = by_recency.len().min(TREND_WINDOW * 2);
    let older = &by_recency[TREND_WINDOW..older_end];

    let delta = logged_rate(recent) - logged_rate(older);
    if delta > TREND_THRESHOLD {
        Trend::Improving
    } else if delta < -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Discrete confidence by data volume
pub fn confidence_level(records: &[ActivityRecord]) -> f64 {
    match records.len() {
        n if n < 7 => 0.3,
        n if n < 30 => 0.6,
        _ => 0.9,
    }
}

/// Completed and total records per weekday, Monday first
pub fn weekday_breakdown(records: &[ActivityRecord]) -> Vec<WeekdayStat> {
    let mut stats: Vec<WeekdayStat> = (0..7)
        .map(|i| WeekdayStat {
            weekday: weekday_from_monday(i),
            completed: 0,
            total: 0,
        })
        .collect();

    for record in records {
        let idx = record.date.weekday().num_days_from_monday() as usize;
        stats[idx].total += 1;
        if record.status.is_completed() {
            stats[idx].completed += 1;
        }
    }

    stats
}

/// Weekday with the most completions; earliest weekday wins ties
pub fn best_weekday(records: &[ActivityRecord]) -> Option<Weekday> {
    weekday_breakdown(records)
        .into_iter()
        .filter(|s| s.completed > 0)
        .fold(None, |best: Option<WeekdayStat>, s| match best {
            Some(b) if b.completed >= s.completed => Some(b),
            _ => Some(s),
        })
        .map(|s| s.weekday)
}

fn logged_rate(records: &[&ActivityRecord]) -> f64 {
    let completed = records.iter().filter(|r| r.status.is_completed()).count();
    ratio(completed as u64, records.len() as u64)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn weekday_from_monday(i: u32) -> Weekday {
    match i {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityStatus;
    use chrono::{TimeZone, Utc};

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap() + Duration::days(offset)
    }

    fn rec(offset: i64, status: ActivityStatus) -> ActivityRecord {
        let date = day(offset);
        let created = Utc.from_utc_datetime(&date.and_hms_opt(9, 0, 0).unwrap());
        ActivityRecord::new(1, 1, date, status, created)
    }

    fn completed(offsets: &[i64]) -> Vec<ActivityRecord> {
        offsets.iter().map(|&o| rec(o, ActivityStatus::Completed)).collect()
    }

    #[test]
    fn test_empty_history() {
        let today = day(0);
        assert_eq!(current_streak(&[], today, Qualifier::AnyStatus), 0);
        assert_eq!(longest_streak(&[], Qualifier::AnyStatus), 0);
        assert_eq!(consistency_score(&[]), 0.0);
        assert_eq!(trend(&[]), Trend::InsufficientData);
        assert_eq!(confidence_level(&[]), 0.3);
        assert_eq!(
            completion_rate(&[], DateWindow::trailing(today, 30), Denominator::LoggedRecords),
            0.0
        );
        assert!(best_weekday(&[]).is_none());
    }

    #[test]
    fn test_consecutive_days() {
        let records = completed(&[-2, -1, 0]);
        assert_eq!(current_streak(&records, day(0), Qualifier::CompletedOnly), 3);
        assert_eq!(longest_streak(&records, Qualifier::CompletedOnly), 3);
    }

    #[test]
    fn test_gap_splits_runs() {
        let records = completed(&[-5, -4, -2, -1, 0]);
        assert_eq!(longest_streak(&records, Qualifier::CompletedOnly), 3);
        assert_eq!(current_streak(&records, day(0), Qualifier::CompletedOnly), 3);
    }

    #[test]
    fn test_longest_run_in_the_past() {
        let records = completed(&[-10, -9, -8, -7, -1, 0]);
        assert_eq!(longest_streak(&records, Qualifier::CompletedOnly), 4);
        assert_eq!(current_streak(&records, day(0), Qualifier::CompletedOnly), 2);
    }

    #[test]
    fn test_inactive_today_breaks_current() {
        let records = completed(&[-3, -2, -1]);
        assert_eq!(current_streak(&records, day(0), Qualifier::CompletedOnly), 0);
        assert_eq!(longest_streak(&records, Qualifier::CompletedOnly), 3);
    }

    #[test]
    fn test_qualifier_changes_active_dates() {
        let records = vec![
            rec(-1, ActivityStatus::Completed),
            rec(0, ActivityStatus::Missed),
        ];
        assert_eq!(current_streak(&records, day(0), Qualifier::AnyStatus), 2);
        assert_eq!(current_streak(&records, day(0), Qualifier::CompletedOnly), 0);
        assert_eq!(active_dates(&records, Qualifier::CompletedOnly).len(), 1);
    }

    #[test]
    fn test_multiple_records_per_day_count_once() {
        let mut records = completed(&[0, 0, 0, -1]);
        records.push(rec(-1, ActivityStatus::Partial));
        let summary = streak_summary(&records, day(0), Qualifier::AnyStatus);
        assert_eq!(summary.current, 2);
        assert_eq!(summary.longest, 2);
        assert_eq!(summary.active_days, 2);
    }

    #[test]
    fn test_longest_never_below_current() {
        let histories = [
            completed(&[]),
            completed(&[0]),
            completed(&[-1]),
            completed(&[-6, -5, -3, -2, -1, 0]),
            completed(&[-20, -19, -18, -17, -16, 0]),
        ];
        for history in &histories {
            let current = current_streak(history, day(0), Qualifier::CompletedOnly);
            let longest = longest_streak(history, Qualifier::CompletedOnly);
            assert!(longest >= current);
            let today_active = active_dates(history, Qualifier::CompletedOnly).contains(&day(0));
            assert_eq!(current == 0, !today_active);
        }
    }

    #[test]
    fn test_completion_rate_denominators_differ() {
        let records = vec![
            rec(0, ActivityStatus::Completed),
            rec(0, ActivityStatus::Completed),
            rec(-1, ActivityStatus::Missed),
            rec(-2, ActivityStatus::Completed),
        ];
        let window = DateWindow::trailing(day(0), 10);
        assert_eq!(window.len_days(), 10);

        let logged = completion_rate(&records, window, Denominator::LoggedRecords);
        assert!((logged - 0.75).abs() < 1e-9);

        let calendar = completion_rate(&records, window, Denominator::CalendarDays);
        assert!((calendar - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_completion_rate_ignores_records_outside_window() {
        let records = vec![rec(-40, ActivityStatus::Missed), rec(0, ActivityStatus::Completed)];
        let window = DateWindow::trailing(day(0), 30);
        assert_eq!(completion_rate(&records, window, Denominator::LoggedRecords), 1.0);
    }

    #[test]
    fn test_consistency_degenerate() {
        assert_eq!(consistency_score(&completed(&[0])), 0.0);
        // Missed records never count
        let records = vec![rec(0, ActivityStatus::Completed), rec(1, ActivityStatus::Missed)];
        assert_eq!(consistency_score(&records), 0.0);
    }

    #[test]
    fn test_consistency_zero_mean_interval() {
        // Same day, same creation instant: every interval is 0 hours
        let records = completed(&[0, 0, 0, 0]);
        assert_eq!(consistency_score(&records), 0.0);
    }

    #[test]
    fn test_consistency_even_beats_irregular() {
        let even = completed(&[0, 2, 4, 6, 8]);
        let irregular = completed(&[0, 1, 2, 7, 8]);

        let even_score = consistency_score(&even);
        let irregular_score = consistency_score(&irregular);

        assert!((even_score - 1.0).abs() < 1e-9);
        assert!(irregular_score < even_score);
        assert!((0.0..=1.0).contains(&irregular_score));
    }

    #[test]
    fn test_trend_requires_seven() {
        let records = completed(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(trend(&records), Trend::InsufficientData);
    }

    #[test]
    fn test_trend_improving_declining_stable() {
        let mut improving: Vec<ActivityRecord> =
            (0..7).map(|i| rec(-i, ActivityStatus::Completed)).collect();
        improving.extend((7..14).map(|i| rec(-i, ActivityStatus::Missed)));
        assert_eq!(trend(&improving), Trend::Improving);

        let mut declining: Vec<ActivityRecord> =
            (0..7).map(|i| rec(-i, ActivityStatus::Missed)).collect();
        declining.extend((7..14).map(|i| rec(-i, ActivityStatus::Completed)));
        assert_eq!(trend(&declining), Trend::Declining);

        let stable: Vec<ActivityRecord> =
            (0..14).map(|i| rec(-i, ActivityStatus::Completed)).collect();
        assert_eq!(trend(&stable), Trend::Stable);
    }

    #[test]
    fn test_trend_with_short_older_window() {
        // Seven completed, nothing older: older rate is 0
        let records: Vec<ActivityRecord> =
            (0..7).map(|i| rec(-i, ActivityStatus::Completed)).collect();
        assert_eq!(trend(&records), Trend::Improving);
    }

    #[test]
    fn test_confidence_buckets() {
        let six = completed(&[0, 1, 2, 3, 4, 5]);
        let seven = completed(&[0, 1, 2, 3, 4, 5, 6]);
        let thirty: Vec<ActivityRecord> = (0..30).map(|i| rec(i, ActivityStatus::Missed)).collect();
        assert_eq!(confidence_level(&six), 0.3);
        assert_eq!(confidence_level(&seven), 0.6);
        assert_eq!(confidence_level(&thirty[..29]), 0.6);
        assert_eq!(confidence_level(&thirty), 0.9);
    }

    #[test]
    fn test_weekday_breakdown() {
        // 2024-06-15 is a Saturday
        let records = vec![
            rec(0, ActivityStatus::Completed),
            rec(7, ActivityStatus::Completed),
            rec(2, ActivityStatus::Completed),
            rec(2, ActivityStatus::Missed),
        ];
        let stats = weekday_breakdown(&records);
        assert_eq!(stats.len(), 7);
        assert_eq!(stats[5].weekday, Weekday::Sat);
        assert_eq!(stats[5].completed, 2);
        assert_eq!(stats[0].total, 2);
        assert_eq!(best_weekday(&records), Some(Weekday::Sat));
    }

    #[test]
    fn test_inputs_not_mutated() {
        let records = completed(&[3, 1, 2]);
        let before = records.clone();
        let _ = trend(&records);
        let _ = consistency_score(&records);
        let _ = longest_streak(&records, Qualifier::AnyStatus);
        assert_eq!(records, before);
    }
}
