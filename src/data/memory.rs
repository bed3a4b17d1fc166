//! In-memory event store.
//!
//! Backs tests, the one-shot `detect` CLI, and CSV-loaded serving. Evaluates
//! the structured predicate directly over event and device rows, which keeps
//! it the reference implementation of the predicate semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::data::filter::{Condition, DateField, DeviceColumn, MasterColumn, Predicate};
use crate::data::store::{
    CodePopulationRow, DateWindow, EntityCodeRow, EntityMonthRow, EntityQuery, EntityTotalRow,
    EventStore, OutcomeCounts, PopulationCounts, StoreError,
};
use crate::signals::types::{DrillLevel, MonthKey};

/// One master event row.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub mdr_report_key: String,
    pub date_received: NaiveDate,
    #[serde(default)]
    pub date_of_event: Option<NaiveDate>,
    /// Store codes: `D`, `IN`, `M`, `O`, `*`.
    pub event_type: String,
    #[serde(default)]
    pub manufacturer_clean: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
}

/// One device row associated with an event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceRecord {
    pub mdr_report_key: String,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub manufacturer_d_clean: Option<String>,
    #[serde(default)]
    pub device_report_product_code: Option<String>,
    #[serde(default)]
    pub implant_flag: Option<String>,
}

/// In-memory corpus.
#[derive(Debug, Default)]
pub struct MemStore {
    events: Vec<EventRecord>,
    devices: HashMap<String, Vec<DeviceRecord>>,
    narratives: HashMap<String, Vec<String>>,
}

impl MemStore {
    pub fn new(
        events: Vec<EventRecord>,
        devices: Vec<DeviceRecord>,
        narratives: Vec<(String, String)>,
    ) -> Self {
        let mut by_key: HashMap<String, Vec<DeviceRecord>> = HashMap::new();
        for device in devices {
            by_key.entry(device.mdr_report_key.clone()).or_default().push(device);
        }
        let mut texts: HashMap<String, Vec<String>> = HashMap::new();
        for (key, text) in narratives {
            texts.entry(key).or_default().push(text);
        }
        Self { events, devices: by_key, narratives: texts }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn devices_of(&self, key: &str) -> &[DeviceRecord] {
        self.devices.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn event_date(&self, event: &EventRecord, field: DateField) -> Option<NaiveDate> {
        match field {
            DateField::DateReceived => Some(event.date_received),
            DateField::DateOfEvent => event.date_of_event,
        }
    }

    fn narrative_matches(&self, key: &str, needle: &str) -> bool {
        self.narratives
            .get(key)
            .map(|texts| texts.iter().any(|t| t.to_lowercase().contains(needle)))
            .unwrap_or(false)
    }

    fn device_field<'a>(device: &'a DeviceRecord, column: DeviceColumn) -> Option<&'a str> {
        match column {
            DeviceColumn::BrandName => device.brand_name.as_deref(),
            DeviceColumn::GenericName => device.generic_name.as_deref(),
            DeviceColumn::ManufacturerDClean => device.manufacturer_d_clean.as_deref(),
            DeviceColumn::ModelNumber => device.model_number.as_deref(),
            DeviceColumn::DeviceReportProductCode => device.device_report_product_code.as_deref(),
            DeviceColumn::ImplantFlag => device.implant_flag.as_deref(),
        }
    }

    fn device_level_field<'a>(device: &'a DeviceRecord, level: DrillLevel) -> Option<&'a str> {
        match level {
            DrillLevel::Manufacturer => None,
            DrillLevel::Brand => device.brand_name.as_deref(),
            DrillLevel::Generic => device.generic_name.as_deref(),
            DrillLevel::Model => device.model_number.as_deref(),
        }
    }

    /// Does a master-side condition accept this event?
    fn master_condition_matches(&self, event: &EventRecord, condition: &Condition) -> bool {
        match condition {
            Condition::DateBetween { field, from, to } => {
                let Some(date) = self.event_date(event, *field) else {
                    return false;
                };
                from.map_or(true, |f| date >= f) && to.map_or(true, |t| date <= t)
            }
            Condition::EventTypeIn(codes) => codes.iter().any(|c| c == &event.event_type),
            Condition::MasterIn { column, values } => {
                let field = match column {
                    MasterColumn::ManufacturerClean => event.manufacturer_clean.as_deref(),
                    MasterColumn::ProductCode => event.product_code.as_deref(),
                };
                field.map_or(false, |v| values.iter().any(|x| x == v))
            }
            Condition::NarrativeContains(needle) => {
                self.narrative_matches(&event.mdr_report_key, needle)
            }
            Condition::EntityIn { level: DrillLevel::Manufacturer, values } => event
                .manufacturer_clean
                .as_deref()
                .map_or(false, |v| values.iter().any(|x| x == v)),
            // Device-side conditions are applied per device row.
            Condition::DeviceIn { .. } | Condition::EntityIn { .. } => true,
        }
    }

    fn device_condition_matches(device: &DeviceRecord, condition: &Condition) -> bool {
        match condition {
            Condition::DeviceIn { column, values } => Self::device_field(device, *column)
                .map_or(false, |v| values.iter().any(|x| x == v)),
            Condition::EntityIn { level, values } if *level != DrillLevel::Manufacturer => {
                Self::device_level_field(device, *level)
                    .map_or(false, |v| values.iter().any(|x| x == v))
            }
            _ => true,
        }
    }

    /// Evaluate the predicate for one event. Returns `None` when the event is
    /// filtered out; otherwise the device rows that satisfied the device-side
    /// conditions (empty slice semantics differ by join requirement).
    fn matching_devices<'a>(
        &'a self,
        event: &EventRecord,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Option<Vec<&'a DeviceRecord>> {
        if event.date_received < window.start || event.date_received > window.end {
            return None;
        }
        for condition in &predicate.conditions {
            if !condition.is_device_side() && !self.master_condition_matches(event, condition) {
                return None;
            }
        }

        let device_conditions: Vec<&Condition> = predicate
            .conditions
            .iter()
            .filter(|c| c.is_device_side())
            .collect();

        let matching: Vec<&DeviceRecord> = self
            .devices_of(&event.mdr_report_key)
            .iter()
            .filter(|device| {
                device_conditions
                    .iter()
                    .all(|c| Self::device_condition_matches(device, c))
            })
            .collect();

        if (predicate.needs_device_join || !device_conditions.is_empty()) && matching.is_empty() {
            return None;
        }
        Some(matching)
    }

    /// Entity values (post-rewrite) this event contributes to at the query's
    /// level. Manufacturer events contribute one value; device levels one per
    /// distinct device value among the matching devices.
    fn entity_values(
        &self,
        event: &EventRecord,
        devices: &[&DeviceRecord],
        query: &EntityQuery,
    ) -> Vec<String> {
        match query.expr.level {
            DrillLevel::Manufacturer => event
                .manufacturer_clean
                .as_deref()
                .map(|raw| vec![query.expr.rewrite(raw)])
                .unwrap_or_default(),
            level => {
                let mut values: BTreeSet<String> = BTreeSet::new();
                for device in devices {
                    if let Some(raw) = Self::device_level_field(device, level) {
                        values.insert(query.expr.rewrite(raw));
                    }
                }
                values.into_iter().collect()
            }
        }
    }

    fn outcome_of(event: &EventRecord) -> OutcomeCounts {
        OutcomeCounts {
            total: 1,
            deaths: (event.event_type == "D") as u64,
            injuries: (event.event_type == "IN") as u64,
            malfunctions: (event.event_type == "M") as u64,
        }
    }
}

impl EventStore for MemStore {
    fn entity_month_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityMonthRow>, StoreError> {
        let mut buckets: BTreeMap<(String, MonthKey), OutcomeCounts> = BTreeMap::new();
        for event in &self.events {
            let Some(devices) = self.matching_devices(event, query.predicate, query.window) else {
                continue;
            };
            let month = MonthKey::from_date(event.date_received);
            for entity in self.entity_values(event, &devices, query) {
                buckets
                    .entry((entity, month))
                    .or_default()
                    .add(Self::outcome_of(event));
            }
        }
        Ok(buckets
            .into_iter()
            .map(|((entity, month), counts)| EntityMonthRow { entity, month, counts })
            .collect())
    }

    fn entity_period_totals(&self, query: &EntityQuery) -> Result<Vec<EntityTotalRow>, StoreError> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for event in &self.events {
            let Some(devices) = self.matching_devices(event, query.predicate, query.window) else {
                continue;
            };
            for entity in self.entity_values(event, &devices, query) {
                *totals.entry(entity).or_default() += 1;
            }
        }
        Ok(totals
            .into_iter()
            .map(|(entity, total)| EntityTotalRow { entity, total })
            .collect())
    }

    fn population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<PopulationCounts, StoreError> {
        let mut counts = PopulationCounts::default();
        for event in &self.events {
            if self.matching_devices(event, predicate, window).is_none() {
                continue;
            }
            counts.total += 1;
            counts.deaths += (event.event_type == "D") as u64;
        }
        Ok(counts)
    }

    fn entity_code_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityCodeRow>, StoreError> {
        let mut buckets: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for event in &self.events {
            let Some(devices) = self.matching_devices(event, query.predicate, query.window) else {
                continue;
            };
            let Some(code) = event.product_code.clone() else {
                continue;
            };
            let is_death = event.event_type == "D";
            for entity in self.entity_values(event, &devices, query) {
                let slot = buckets.entry((entity, code.clone())).or_default();
                slot.0 += 1;
                slot.1 += is_death as u64;
            }
        }
        Ok(buckets
            .into_iter()
            .map(|((entity, product_code), (total, deaths))| EntityCodeRow {
                entity,
                product_code,
                total,
                deaths,
            })
            .collect())
    }

    fn code_population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<Vec<CodePopulationRow>, StoreError> {
        let mut buckets: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for event in &self.events {
            if self.matching_devices(event, predicate, window).is_none() {
                continue;
            }
            let Some(code) = event.product_code.clone() else {
                continue;
            };
            let slot = buckets.entry(code).or_default();
            slot.0 += 1;
            slot.1 += (event.event_type == "D") as u64;
        }
        Ok(buckets
            .into_iter()
            .map(|(product_code, (total, deaths))| CodePopulationRow {
                product_code,
                total,
                deaths,
            })
            .collect())
    }

    fn exists_at_level(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<bool, StoreError> {
        let expr = crate::data::filter::EntityExpr::identity(level);
        let query = EntityQuery { expr: &expr, predicate, window };
        for event in &self.events {
            let Some(devices) = self.matching_devices(event, predicate, window) else {
                continue;
            };
            if !self.entity_values(event, &devices, &query).is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn entity_event_counts(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let needle = search.map(|s| s.to_lowercase());
        let expr = crate::data::filter::EntityExpr::identity(level);
        let query = EntityQuery {
            expr: &expr,
            predicate,
            window: DateWindow {
                start: NaiveDate::MIN,
                end: NaiveDate::MAX,
            },
        };
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for event in &self.events {
            let Some(devices) = self.matching_devices(event, predicate, query.window) else {
                continue;
            };
            for entity in self.entity_values(event, &devices, &query) {
                if let Some(needle) = &needle {
                    if !entity.to_lowercase().contains(needle) {
                        continue;
                    }
                }
                *counts.entry(entity).or_default() += 1;
            }
        }
        let mut rows: Vec<(String, u64)> = counts.into_iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows.truncate(limit);
        Ok(rows)
    }

    fn latest_received(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.events.iter().map(|e| e.date_received).max())
    }
}
