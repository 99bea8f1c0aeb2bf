//! Achievement catalog.
//!
//! Definitions are reference data edited by administrators elsewhere. The
//! engine reads them once per evaluation pass and never writes them back
//! except when seeding the default catalog into an empty database.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How an achievement measures progress
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleType {
    Streak,
    Count,
    Milestone,
    Special,
    /// Stored value this build does not recognise
    Unknown(String),
}

impl RuleType {
    pub fn parse(s: &str) -> Self {
        match s {
            "streak" => RuleType::Streak,
            "count" => RuleType::Count,
            "milestone" => RuleType::Milestone,
            "special" => RuleType::Special,
            other => RuleType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RuleType::Streak => "streak",
            RuleType::Count => "count",
            RuleType::Milestone => "milestone",
            RuleType::Special => "special",
            RuleType::Unknown(s) => s,
        }
    }
}

impl From<String> for RuleType {
    fn from(s: String) -> Self {
        RuleType::parse(&s)
    }
}

impl From<RuleType> for String {
    fn from(r: RuleType) -> Self {
        r.as_str().to_string()
    }
}

/// What data an achievement counts; meaning depends on the rule type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Habits,
    Logs,
    CompletedLogs,
    DaysActive,
    Unknown(String),
}

impl Category {
    pub fn parse(s: &str) -> Self {
        match s {
            "habits" => Category::Habits,
            "logs" => Category::Logs,
            "completed_logs" => Category::CompletedLogs,
            "days_active" => Category::DaysActive,
            other => Category::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::Habits => "habits",
            Category::Logs => "logs",
            Category::CompletedLogs => "completed_logs",
            Category::DaysActive => "days_active",
            Category::Unknown(s) => s,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::parse(&s)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    /// Unique identifier
    pub id: String,
    pub name: String,
    pub description: String,
    pub rule_type: RuleType,
    pub category: Category,
    /// Threshold that `current` must reach
    pub requirement: u64,
    /// Points awarded on unlock
    pub points: i64,
    pub active: bool,
}

impl AchievementDefinition {
    pub fn new(
        id: &str,
        name: &str,
        description: &str,
        rule_type: RuleType,
        category: Category,
        requirement: u64,
        points: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            rule_type,
            category,
            requirement,
            points: points.max(0),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether this entry may be handed to the evaluator
    pub fn is_evaluable(&self) -> bool {
        self.active && self.requirement > 0
    }
}

/// Built-in catalog used to seed an empty database
pub fn default_definitions() -> Vec<AchievementDefinition> {
    use Category::*;
    use RuleType::*;

    let def = AchievementDefinition::new;
    vec![
        // Count achievements
        def("first_log", "First Step", "Log your first activity", Count, Logs, 1, 10),
        def("ten_logs", "Getting Started", "Log 10 activities", Count, Logs, 10, 25),
        def(
            "five_completed",
            "Follow Through",
            "Complete 5 activities",
            Count,
            CompletedLogs,
            5,
            20,
        ),
        def("three_habits", "Juggler", "Track 3 different habits", Count, Habits, 3, 15),
        // Streak achievements
        def("streak_3", "On Fire", "Complete habits 3 days in a row", Streak, Habits, 3, 30),
        def("streak_7", "Week Warrior", "Complete habits 7 days in a row", Streak, Habits, 7, 70),
        def(
            "streak_30",
            "Monthly Master",
            "Complete habits 30 days in a row",
            Streak,
            Habits,
            30,
            300,
        ),
        def(
            "log_streak_7",
            "Checking In",
            "Log something 7 days running, up to today",
            Streak,
            Logs,
            7,
            50,
        ),
        // Milestones
        def(
            "fifty_completed",
            "Half Century",
            "Complete 50 activities",
            Milestone,
            CompletedLogs,
            50,
            100,
        ),
        def(
            "hundred_completed",
            "Centurion",
            "Complete 100 activities",
            Milestone,
            CompletedLogs,
            100,
            200,
        ),
        def(
            "days_active_30",
            "Regular",
            "Be active on 30 different days",
            Milestone,
            DaysActive,
            30,
            150,
        ),
        // Special achievements, evaluated by rules in `SpecialRules::builtin`
        def(
            "perfect_week",
            "Perfect Week",
            "Complete something every day of a calendar week",
            Special,
            Habits,
            1,
            100,
        ),
    ]
}

/// The set of achievement definitions for one evaluation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self { definitions }
    }

    pub fn builtin() -> Self {
        Self::new(default_definitions())
    }

    pub fn all(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions exposed to evaluation: active with a positive requirement
    pub fn active(&self) -> Vec<&AchievementDefinition> {
        self.definitions
            .iter()
            .filter(|d| {
                if d.active && d.requirement == 0 {
                    warn!("Achievement {} has requirement 0, skipping", d.id);
                }
                d.is_evaluable()
            })
            .collect()
    }

    pub fn by_category(&self, category: &Category) -> Vec<&AchievementDefinition> {
        self.active()
            .into_iter()
            .filter(|d| &d.category == category)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    /// Ids of entries whose rule type or category is not recognised
    pub fn defects(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .filter(|d| {
                matches!(d.rule_type, RuleType::Unknown(_))
                    || matches!(d.category, Category::Unknown(_))
            })
            .map(|d| d.id.as_str())
            .collect()
    }
}
