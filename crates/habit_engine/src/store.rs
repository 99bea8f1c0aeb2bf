//! SQLite storage for the engine.
//!
//! One connection behind an async mutex; every query runs on the blocking
//! pool. The schema carries the uniqueness guarantees the unlock state
//! machine depends on: `unlock_records` is keyed on `(user_id, achievement_id)`
//! and nothing in the engine updates or deletes ledger rows.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::activity::{ActivityRecord, ActivitySnapshot, ActivityStatus, Habit, UserId};
use crate::catalog::{AchievementCatalog, AchievementDefinition, Category, RuleType};
use crate::error::{EngineError, Result};

const APP_DIR: &str = "habit-engine";
const DB_FILE: &str = "engine.db";

/// Where the engine database file lives
#[derive(Debug, Clone, PartialEq)]
pub enum DbLocation {
    /// `habit-engine/engine.db` under the user's XDG data home
    UserData,
    /// A file named in configuration or by a test
    File(PathBuf),
}

impl DbLocation {
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            DbLocation::UserData => {
                let data_home =
                    user_data_home(std::env::var_os("XDG_DATA_HOME"), std::env::var_os("HOME"))?;
                Ok(data_home.join(APP_DIR).join(DB_FILE))
            }
            DbLocation::File(path) => Ok(path.clone()),
        }
    }
}

/// `$XDG_DATA_HOME` when it is set to an absolute path, else `$HOME/.local/share`.
/// Relative or empty values are ignored, as the XDG base directory rules require.
fn user_data_home(xdg_data_home: Option<OsString>, home: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = xdg_data_home.map(PathBuf::from).filter(|p| p.is_absolute()) {
        return Ok(dir);
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(".local").join("share")),
        None => Err(EngineError::DataDir(
            "neither XDG_DATA_HOME nor HOME is usable".to_string(),
        )),
    }
}

/// Shared handle to the engine database
pub struct EngineDb {
    conn: Arc<Mutex<Connection>>,
    location: DbLocation,
}

impl EngineDb {
    /// Open or create the database and bootstrap the schema
    pub async fn open(location: DbLocation) -> Result<Self> {
        let db_path = location.resolve()?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("Opening engine database at: {}", db_path.display());

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(conn)
        })
        .await??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS habits (
                    id INTEGER PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    active BOOLEAN NOT NULL DEFAULT TRUE
                );
                CREATE INDEX IF NOT EXISTS idx_habits_user ON habits(user_id);

                CREATE TABLE IF NOT EXISTS activity_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    habit_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    status TEXT NOT NULL,
                    payload TEXT,
                    note TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_activity_user_date
                    ON activity_records(user_id, date);

                CREATE TABLE IF NOT EXISTS achievement_definitions (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    rule_type TEXT NOT NULL,
                    category TEXT NOT NULL,
                    requirement INTEGER NOT NULL,
                    points INTEGER NOT NULL DEFAULT 0,
                    active BOOLEAN NOT NULL DEFAULT TRUE
                );

                CREATE TABLE IF NOT EXISTS unlock_records (
                    user_id INTEGER NOT NULL,
                    achievement_id TEXT NOT NULL,
                    unlocked_at TEXT NOT NULL,
                    progress_snapshot INTEGER NOT NULL,
                    PRIMARY KEY (user_id, achievement_id)
                );

                CREATE TABLE IF NOT EXISTS points_ledger (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    amount INTEGER NOT NULL,
                    source TEXT NOT NULL,
                    description TEXT NOT NULL,
                    metadata TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_ledger_user ON points_ledger(user_id);",
            )?;
            Ok(())
        })
        .await?;

        debug!("Engine schema ready");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }
}

// ============================================================================
// Activity (read view over rows owned by the CRUD layer)
// ============================================================================

/// Read-only access to a user's habits and activity records
#[derive(Clone)]
pub struct ActivityStore {
    db: Arc<EngineDb>,
}

impl ActivityStore {
    pub fn new(db: Arc<EngineDb>) -> Self {
        Self { db }
    }

    /// Habits and records for `user_id` dated in `[since, until]`;
    /// `since = None` reads the whole history up to `until`.
    pub async fn snapshot(
        &self,
        user_id: UserId,
        since: Option<NaiveDate>,
        until: NaiveDate,
    ) -> Result<ActivitySnapshot> {
        let snapshot = self
            .db
            .execute(move |conn| {
                let records = query_records(conn, user_id, since, until)?;
                let habits = query_habits(conn, user_id)?;
                Ok(ActivitySnapshot::new(user_id, records, habits))
            })
            .await?;

        debug!(
            "Loaded snapshot for user {}: {} records, {} habits",
            user_id,
            snapshot.records.len(),
            snapshot.habits.len()
        );
        Ok(snapshot)
    }

    /// Load rows produced upstream (`habitctl import`, fixtures)
    pub async fn import(&self, habits: Vec<Habit>, records: Vec<ActivityRecord>) -> Result<usize> {
        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                for habit in &habits {
                    tx.execute(
                        "INSERT OR REPLACE INTO habits (id, user_id, name, active)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![habit.id, habit.user_id, habit.name, habit.active],
                    )?;
                }
                for record in &records {
                    insert_record(&tx, record)?;
                }
                tx.commit()?;
                Ok(records.len())
            })
            .await
    }
}

fn insert_record(conn: &Connection, record: &ActivityRecord) -> Result<i64> {
    let payload = match &record.payload {
        serde_json::Value::Null => None,
        value => Some(serde_json::to_string(value)?),
    };

    conn.execute(
        "INSERT INTO activity_records (user_id, habit_id, date, status, payload, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.user_id,
            record.habit_id,
            record.date,
            record.status.as_str(),
            payload,
            record.note,
            format_instant(&record.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_records(
    conn: &Connection,
    user_id: UserId,
    since: Option<NaiveDate>,
    until: NaiveDate,
) -> rusqlite::Result<Vec<ActivityRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, habit_id, date, status, payload, note, created_at
         FROM activity_records
         WHERE user_id = ?1 AND (?2 IS NULL OR date >= ?2) AND date <= ?3
         ORDER BY date ASC, created_at ASC, id ASC",
    )?;

    let records = stmt
        .query_map(params![user_id, since, until], record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
    let status: String = row.get(4)?;
    let payload: Option<String> = row.get(5)?;
    let created_at: String = row.get(7)?;

    Ok(ActivityRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        habit_id: row.get(2)?,
        date: row.get(3)?,
        status: ActivityStatus::parse(&status),
        payload: payload
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        note: row.get(6)?,
        created_at: parse_instant(&created_at),
    })
}

fn query_habits(conn: &Connection, user_id: UserId) -> rusqlite::Result<Vec<Habit>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, active FROM habits WHERE user_id = ?1 ORDER BY id",
    )?;
    let habits = stmt
        .query_map(params![user_id], |row| {
            Ok(Habit {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                active: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(habits)
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so text order matches time order
pub(crate) fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 column, falling back to the epoch for unreadable rows
pub(crate) fn parse_instant(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<EngineDb>,
}

impl CatalogStore {
    pub fn new(db: Arc<EngineDb>) -> Self {
        Self { db }
    }

    /// Full catalog, active and inactive
    pub async fn load(&self) -> Result<AchievementCatalog> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, description, rule_type, category, requirement, points, active
                     FROM achievement_definitions
                     ORDER BY id",
                )?;
                let definitions = stmt
                    .query_map([], |row| {
                        let rule_type: String = row.get(3)?;
                        let category: String = row.get(4)?;
                        let requirement: i64 = row.get(5)?;
                        let points: i64 = row.get(6)?;
                        Ok(AchievementDefinition {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            rule_type: RuleType::parse(&rule_type),
                            category: Category::parse(&category),
                            requirement: requirement.max(0) as u64,
                            points: points.max(0),
                            active: row.get(7)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(AchievementCatalog::new(definitions))
            })
            .await
    }

    /// Insert or replace one definition
    pub async fn upsert(&self, definition: AchievementDefinition) -> Result<()> {
        self.db
            .execute(move |conn| {
                write_definition(conn, &definition, "INSERT OR REPLACE")?;
                Ok(())
            })
            .await
    }

    /// Insert definitions that are not present yet; returns how many were added
    pub async fn seed(&self, definitions: Vec<AchievementDefinition>) -> Result<usize> {
        let added = self
            .db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let mut added = 0;
                for definition in &definitions {
                    added += write_definition(&tx, definition, "INSERT OR IGNORE")?;
                }
                tx.commit()?;
                Ok(added)
            })
            .await?;

        if added > 0 {
            info!("Seeded {} achievement definitions", added);
        }
        Ok(added)
    }
}

fn write_definition(
    conn: &Connection,
    definition: &AchievementDefinition,
    verb: &str,
) -> rusqlite::Result<usize> {
    let sql = format!(
        "{} INTO achievement_definitions
            (id, name, description, rule_type, category, requirement, points, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        verb
    );
    conn.execute(
        &sql,
        params![
            definition.id,
            definition.name,
            definition.description,
            definition.rule_type.as_str(),
            definition.category.as_str(),
            definition.requirement as i64,
            definition.points,
            definition.active,
        ],
    )
}
