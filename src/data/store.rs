//! Event-store port: the operations the engine needs from any backing store.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::filter::{EntityExpr, Predicate};
use crate::signals::types::{DrillLevel, MonthKey};

/// Store-level failure; surfaced to clients as `StoreUnavailable`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Outcome counters for one slice of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub total: u64,
    pub deaths: u64,
    pub injuries: u64,
    pub malfunctions: u64,
}

impl OutcomeCounts {
    pub fn add(&mut self, other: OutcomeCounts) {
        self.total += other.total;
        self.deaths += other.deaths;
        self.injuries += other.injuries;
        self.malfunctions += other.malfunctions;
    }
}

/// Per-entity per-month outcome row.
#[derive(Debug, Clone)]
pub struct EntityMonthRow {
    pub entity: String,
    pub month: MonthKey,
    pub counts: OutcomeCounts,
}

/// Per-entity total over a window.
#[derive(Debug, Clone)]
pub struct EntityTotalRow {
    pub entity: String,
    pub total: u64,
}

/// Death/total counters for a comparison population.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationCounts {
    pub total: u64,
    pub deaths: u64,
}

/// Per-entity per-product-code outcome split.
#[derive(Debug, Clone)]
pub struct EntityCodeRow {
    pub entity: String,
    pub product_code: String,
    pub total: u64,
    pub deaths: u64,
}

/// Per-product-code population split.
#[derive(Debug, Clone)]
pub struct CodePopulationRow {
    pub product_code: String,
    pub total: u64,
    pub deaths: u64,
}

/// Inclusive analysis window on `date_received`.
#[derive(Debug, Clone, Copy)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One aggregation pass: entity expression, predicate, window.
#[derive(Debug)]
pub struct EntityQuery<'a> {
    pub expr: &'a EntityExpr,
    pub predicate: &'a Predicate,
    pub window: DateWindow,
}

/// Read-only port over the MAUDE event corpus.
///
/// Events are distinct-counted by `mdr_report_key` whenever the devices
/// relation participates: an event with three devices of one brand is a
/// single event for that brand.
pub trait EventStore: Send + Sync {
    /// Per-entity monthly outcome counts over the window, with the entity
    /// expression (group rewrites) applied.
    fn entity_month_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityMonthRow>, StoreError>;

    /// Per-entity event totals over an arbitrary window (comparison periods).
    fn entity_period_totals(&self, query: &EntityQuery) -> Result<Vec<EntityTotalRow>, StoreError>;

    /// Death/total counters over everything matching the predicate.
    fn population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<PopulationCounts, StoreError>;

    /// Per-entity, per-product-code splits; used when the comparison
    /// population is restricted to the entity's own product codes.
    fn entity_code_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityCodeRow>, StoreError>;

    /// Per-product-code population splits over the predicate.
    fn code_population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<Vec<CodePopulationRow>, StoreError>;

    /// Bounded existence probe: does at least one entity exist at `level`
    /// under the predicate?
    fn exists_at_level(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<bool, StoreError>;

    /// Distinct raw entities with event counts, descending by count. `search`
    /// is a case-insensitive substring match on the entity name.
    fn entity_event_counts(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, StoreError>;

    /// Latest `date_received` in the corpus; anchors window resolution.
    fn latest_received(&self) -> Result<Option<NaiveDate>, StoreError>;
}
