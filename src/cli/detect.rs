//! CLI entry-point for a one-shot detection run.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::config::Settings;
use crate::data::csv;
use crate::groups::GroupRegistry;
use crate::signals::detect;
use crate::signals::types::{
    DrillLevel, SignalMethod, SignalRequest, TimeComparisonConfig, TimeMode,
};

/// Run one detection request against the CSV-loaded corpus.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// Detection methods to apply.
    #[arg(long, value_delimiter = ',', default_value = "zscore")]
    pub methods: Vec<String>,
    /// Drill level: manufacturer, brand, generic, or model.
    #[arg(long, default_value = "manufacturer")]
    pub level: String,
    /// Parent entity when drilling below manufacturer.
    #[arg(long)]
    pub parent: Option<String>,
    /// Months of history to analyse.
    #[arg(long, default_value_t = 12)]
    pub lookback_months: u32,
    /// Comma-separated product codes.
    #[arg(long, value_delimiter = ',')]
    pub product_codes: Vec<String>,
    /// Comma-separated event type codes (D, I, M, O).
    #[arg(long, value_delimiter = ',')]
    pub event_types: Vec<String>,
    /// Minimum events for an entity to be analysed.
    #[arg(long, default_value_t = 10)]
    pub min_events: u64,
    /// Maximum entities returned.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let store = csv::load_store(
        &settings.events_csv,
        &settings.devices_csv,
        settings.mdr_text_csv.as_deref(),
    )?;
    let registry =
        GroupRegistry::open(&settings.groups_db).context("opening entity-group registry")?;

    let request = SignalRequest {
        methods: parse_methods(&args.methods)?,
        time_config: TimeComparisonConfig {
            mode: TimeMode::Lookback,
            lookback_months: args.lookback_months,
            ..TimeComparisonConfig::default()
        },
        level: parse_level(&args.level)?,
        parent_value: args.parent,
        product_codes: non_empty(args.product_codes),
        event_types: non_empty(args.event_types),
        min_events: args.min_events,
        limit: args.limit,
        ..SignalRequest::default()
    };

    let response = detect(
        &store,
        &registry,
        &request,
        Utc::now().date_naive(),
        settings.lag_months,
    )?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn parse_methods(raw: &[String]) -> Result<Vec<SignalMethod>> {
    raw.iter()
        .map(|m| {
            serde_json::from_value(serde_json::Value::String(m.to_lowercase()))
                .with_context(|| format!("unknown method '{m}'"))
        })
        .collect()
}

fn parse_level(raw: &str) -> Result<DrillLevel> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .with_context(|| format!("unknown level '{raw}'"))
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}
