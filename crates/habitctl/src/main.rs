//! habitctl - command line front end for the habit engine
//!
//! Every subcommand prints JSON on stdout.

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "habitctl")]
#[command(about = "Habit analytics, achievements and points", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: /etc/habit-engine/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Streaks, rates, trend and recommendations for a user
    Analytics {
        #[arg(long)]
        user: i64,

        /// Evaluation date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Achievement catalog with the user's progress
    Achievements {
        #[arg(long)]
        user: i64,

        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Only one category (habits, logs, completed_logs, days_active)
        #[arg(long)]
        category: Option<String>,
    },

    /// Evaluate achievements and award points for new unlocks
    Check {
        #[arg(long)]
        user: i64,

        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Evaluate a single achievement by id
        #[arg(long)]
        achievement: Option<String>,
    },

    /// Points ledger, total and level
    History {
        #[arg(long)]
        user: i64,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Users ranked by total points
    Leaderboard {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load habits and activity records from a JSON Lines file
    Import {
        /// File with one {"kind": "habit" | "record", ...} object per line
        path: PathBuf,
    },

    /// Insert built-in achievement definitions that are missing
    SeedCatalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let engine = commands::open_engine(cli.config.as_deref(), cli.db).await?;

    match cli.command {
        Commands::Analytics { user, as_of } => commands::analytics(&engine, user, as_of).await,
        Commands::Achievements { user, as_of, category } => {
            commands::achievements(&engine, user, as_of, category).await
        }
        Commands::Check { user, as_of, achievement } => {
            commands::check(&engine, user, as_of, achievement).await
        }
        Commands::History { user, limit } => commands::history(&engine, user, limit).await,
        Commands::Leaderboard { limit } => commands::leaderboard(&engine, limit).await,
        Commands::Import { path } => commands::import(&engine, &path).await,
        Commands::SeedCatalog => commands::seed_catalog(&engine).await,
    }
}
