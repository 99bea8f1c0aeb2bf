//! Command handlers for habitctl.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use habit_engine::{ActivityRecord, Category, Engine, EngineConfig, Habit};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One line of an import file
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ImportLine {
    Habit(Habit),
    Record(ActivityRecord),
}

#[derive(Serialize)]
struct ImportSummary {
    habits: usize,
    records: usize,
}

#[derive(Serialize)]
struct SeedSummary {
    added: usize,
    total: usize,
}

pub async fn open_engine(config_path: Option<&Path>, db: Option<PathBuf>) -> Result<Engine> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::load(),
    };
    if let Some(db) = db {
        config.storage.path = Some(db);
    }

    Engine::open(config)
        .await
        .context("Failed to open habit engine database")
}

fn today_or(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| Local::now().date_naive())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn analytics(engine: &Engine, user: i64, as_of: Option<NaiveDate>) -> Result<()> {
    let report = engine
        .analytics(user, today_or(as_of))
        .await
        .with_context(|| format!("Failed to build analytics for user {}", user))?;
    print_json(&report)
}

pub async fn achievements(
    engine: &Engine,
    user: i64,
    as_of: Option<NaiveDate>,
    category: Option<String>,
) -> Result<()> {
    let category = category.map(|c| Category::parse(&c));
    if let Some(Category::Unknown(name)) = &category {
        bail!("Unknown achievement category: {}", name);
    }

    let statuses = engine
        .achievements(user, today_or(as_of), category.as_ref())
        .await
        .with_context(|| format!("Failed to load achievements for user {}", user))?;
    print_json(&statuses)
}

pub async fn check(
    engine: &Engine,
    user: i64,
    as_of: Option<NaiveDate>,
    achievement: Option<String>,
) -> Result<()> {
    let as_of = today_or(as_of);
    match achievement {
        Some(id) => {
            let outcome = engine
                .check_achievement(user, &id, as_of)
                .await
                .with_context(|| format!("Failed to evaluate {} for user {}", id, user))?;
            print_json(&outcome)
        }
        None => {
            let unlocked = engine
                .check_achievements(user, as_of)
                .await
                .with_context(|| format!("Failed to evaluate achievements for user {}", user))?;
            print_json(&unlocked)
        }
    }
}

pub async fn history(engine: &Engine, user: i64, limit: usize) -> Result<()> {
    let history = engine
        .points_history(user, limit)
        .await
        .with_context(|| format!("Failed to read points for user {}", user))?;
    print_json(&history)
}

pub async fn leaderboard(engine: &Engine, limit: Option<usize>) -> Result<()> {
    let board = engine
        .leaderboard(limit)
        .await
        .context("Failed to build leaderboard")?;
    print_json(&board)
}

pub async fn import(engine: &Engine, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let (habits, records) = parse_import(&content)?;
    let summary = ImportSummary {
        habits: habits.len(),
        records: records.len(),
    };

    engine
        .import(habits, records)
        .await
        .context("Failed to store imported rows")?;
    info!(
        "Imported {} habits and {} records from {}",
        summary.habits,
        summary.records,
        path.display()
    );
    print_json(&summary)
}

pub async fn seed_catalog(engine: &Engine) -> Result<()> {
    let added = engine.seed_catalog().await.context("Failed to seed catalog")?;
    let catalog = engine.catalog().await.context("Failed to load catalog")?;

    let defects = catalog.defects();
    if !defects.is_empty() {
        warn!("Catalog entries with unknown rules: {}", defects.join(", "));
    }

    print_json(&SeedSummary {
        added,
        total: catalog.len(),
    })
}

fn parse_import(content: &str) -> Result<(Vec<Habit>, Vec<ActivityRecord>)> {
    let mut habits = Vec::new();
    let mut records = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(line)
            .with_context(|| format!("Invalid import line {}", index + 1))?;
        match parsed {
            ImportLine::Habit(habit) => habits.push(habit),
            ImportLine::Record(record) => records.push(record),
        }
    }

    Ok((habits, records))
}
