//! CLI entry-point for serving the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::api::{self, AppState};
use crate::config::Settings;
use crate::data::csv;
use crate::groups::GroupRegistry;

/// Run the Axum server.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// Port to bind (default 8080).
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    /// Host address, defaults to localhost.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    let registry =
        GroupRegistry::open(&settings.groups_db).context("opening entity-group registry")?;

    let state = AppState {
        store,
        registry: Arc::new(registry),
        settings,
    };
    api::serve(state, args.host, args.port).await
}

#[cfg(feature = "duckdb")]
fn open_store(settings: &Settings) -> Result<Arc<dyn crate::data::store::EventStore>> {
    if let Some(path) = &settings.duckdb_path {
        let store = crate::data::duck::DuckStore::open(path)?;
        return Ok(Arc::new(store));
    }
    load_csv_store(settings)
}

#[cfg(not(feature = "duckdb"))]
fn open_store(settings: &Settings) -> Result<Arc<dyn crate::data::store::EventStore>> {
    load_csv_store(settings)
}

fn load_csv_store(settings: &Settings) -> Result<Arc<dyn crate::data::store::EventStore>> {
    let store = csv::load_store(
        &settings.events_csv,
        &settings.devices_csv,
        settings.mdr_text_csv.as_deref(),
    )?;
    Ok(Arc::new(store))
}
