//! Runtime configuration for maude-sentinel.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Context;

/// Application configuration resolved from `.env` and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root folder for data artefacts (registry database, CSV drops).
    pub data_dir: PathBuf,
    /// SQLite file backing the entity-group registry.
    pub groups_db: PathBuf,
    /// Flat-file drop of the ingestion pipeline's `master_events` table.
    pub events_csv: PathBuf,
    /// Flat-file drop of the `devices` table.
    pub devices_csv: PathBuf,
    /// Optional flat-file drop of the `mdr_text` narratives.
    pub mdr_text_csv: Option<PathBuf>,
    /// Known FDA reporting lag, in months, used for completeness marking.
    pub lag_months: u32,
    /// DuckDB database path when serving from the columnar store.
    #[cfg(feature = "duckdb")]
    pub duckdb_path: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from environment with reasonable defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let groups_db = env::var("GROUPS_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("entity_groups.db"));
        let events_csv = env::var("EVENTS_CSV")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("master_events.csv"));
        let devices_csv = env::var("DEVICES_CSV")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("devices.csv"));
        let mdr_text_csv = env::var("MDR_TEXT_CSV").ok().map(PathBuf::from);
        let lag_months = env::var("LAG_MONTHS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        std::fs::create_dir_all(&data_dir).context("creating data dir")?;

        Ok(Self {
            data_dir,
            groups_db,
            events_csv,
            devices_csv,
            mdr_text_csv,
            lag_months,
            #[cfg(feature = "duckdb")]
            duckdb_path: env::var("DUCKDB_PATH").ok().map(PathBuf::from),
        })
    }

    /// Convenience helper for derived path segments.
    pub fn join_data<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.data_dir.join(path)
    }
}
