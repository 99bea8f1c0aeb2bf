//! Error types for the habit engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Data directory error: {0}")]
    DataDir(String),
}

impl EngineError {
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Storage(_) => -32010,
            EngineError::Io(_) => -32006,
            EngineError::Json(_) => -32700,
            EngineError::Config(_) => -32011,
            EngineError::TaskJoin(_) => -32603,
            EngineError::Catalog(_) => -32012,
            EngineError::DataDir(_) => -32013,
        }
    }

    /// True when an insert hit an existing primary or unique key. Other
    /// constraint failures (NOT NULL, CHECK, trigger aborts) are not duplicates.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
