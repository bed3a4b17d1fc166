//! Flat-file loading of the ingestion pipeline's weekly CSV drops.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::data::memory::{DeviceRecord, EventRecord, MemStore};

#[derive(Debug, Deserialize)]
struct RawEvent {
    mdr_report_key: String,
    date_received: String,
    #[serde(default)]
    date_of_event: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    manufacturer_clean: Option<String>,
    #[serde(default)]
    product_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNarrative {
    mdr_report_key: String,
    text_content: String,
}

/// Load a `MemStore` from the flat tables. The narratives file is optional.
pub fn load_store(
    events_path: &Path,
    devices_path: &Path,
    mdr_text_path: Option<&Path>,
) -> Result<MemStore> {
    let events = load_events(events_path)?;
    let devices = load_devices(devices_path)?;
    let narratives = match mdr_text_path {
        Some(path) => load_narratives(path)?,
        None => Vec::new(),
    };
    let store = MemStore::new(events, devices, narratives);
    info!(events = store.len(), "loaded event corpus");
    Ok(store)
}

fn load_events(path: &Path) -> Result<Vec<EventRecord>> {
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("opening events csv {}", path.display()))?;
    let mut events = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<RawEvent>() {
        let raw = row.context("reading events csv row")?;
        let Ok(date_received) = raw.date_received.parse() else {
            skipped += 1;
            continue;
        };
        events.push(EventRecord {
            mdr_report_key: raw.mdr_report_key,
            date_received,
            date_of_event: raw.date_of_event.and_then(|d| d.parse().ok()),
            event_type: canonical_event_type(raw.event_type.as_deref()),
            manufacturer_clean: raw.manufacturer_clean.filter(|m| !m.is_empty()),
            product_code: raw.product_code.filter(|c| !c.is_empty()),
        });
    }
    if skipped > 0 {
        warn!(skipped, "dropped events with unparseable date_received");
    }
    Ok(events)
}

fn load_devices(path: &Path) -> Result<Vec<DeviceRecord>> {
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("opening devices csv {}", path.display()))?;
    let mut devices = Vec::new();
    for row in reader.deserialize::<DeviceRecord>() {
        devices.push(row.context("reading devices csv row")?);
    }
    Ok(devices)
}

fn load_narratives(path: &Path) -> Result<Vec<(String, String)>> {
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("opening mdr_text csv {}", path.display()))?;
    let mut narratives = Vec::new();
    for row in reader.deserialize::<RawNarrative>() {
        let raw = row.context("reading mdr_text csv row")?;
        narratives.push((raw.mdr_report_key, raw.text_content));
    }
    Ok(narratives)
}

/// Canonicalise an event-type code to the five store codes; anything else
/// becomes unknown (`*`).
fn canonical_event_type(raw: Option<&str>) -> String {
    match raw.map(|r| r.trim().to_uppercase()).as_deref() {
        Some("D") => "D".to_string(),
        Some("IN") | Some("I") => "IN".to_string(),
        Some("M") => "M".to_string(),
        Some("O") => "O".to_string(),
        _ => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_are_canonicalised() {
        assert_eq!(canonical_event_type(Some("d")), "D");
        assert_eq!(canonical_event_type(Some("I")), "IN");
        assert_eq!(canonical_event_type(Some("IN")), "IN");
        assert_eq!(canonical_event_type(Some("??")), "*");
        assert_eq!(canonical_event_type(None), "*");
    }
}
