//! Signal detection orchestrator: sequences window resolution, group
//! rewrites, aggregation, method computation, and classification.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, instrument};

use crate::data::aggregate::{self, AggregateBundle, EntityAggregate};
use crate::data::filter::{self, Condition, FilterSpec, GroupRewrite, Predicate, QueryPlan};
use crate::data::store::{DateWindow, EventStore};
use crate::error::{SignalError, SignalResult as EngineResult};
use crate::groups::{EntityType, GroupRegistry};
use crate::signals::classify::{self, GateContext, Thresholds};
use crate::signals::types::{
    ComparisonPopulation, DrillLevel, MethodResult, MonthKey, SignalCounts, SignalMethod,
    SignalRequest, SignalResponse, SignalResult, SignalStrength, TimeInfo,
};
use crate::signals::windows::{self, ResolvedWindows};
use crate::signals::{run_method, MethodInput};

/// Request deadline checked at store boundaries. Pure computation between
/// checks runs to completion; a partial result is never returned.
#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn from_request(timeout_ms: Option<u64>) -> Self {
        Self(timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms)))
    }

    fn check(&self) -> EngineResult<()> {
        match self.0 {
            Some(deadline) if Instant::now() > deadline => Err(SignalError::Timeout),
            _ => Ok(()),
        }
    }
}

/// Run one detection request against the store snapshot.
///
/// `today` is the injected wall-clock date; fixing it (and the snapshot)
/// makes the whole computation deterministic.
#[instrument(skip(store, registry, request), fields(level = ?request.level))]
pub fn detect(
    store: &dyn EventStore,
    registry: &GroupRegistry,
    request: &SignalRequest,
    today: NaiveDate,
    lag_months: u32,
) -> EngineResult<SignalResponse> {
    validate(request)?;
    let deadline = Deadline::from_request(request.timeout_ms);
    let limit = request.limit.min(100);

    let anchor = store
        .latest_received()
        .map_err(|e| SignalError::StoreUnavailable(e.to_string()))?
        .unwrap_or(today);
    let resolved = windows::resolve(&request.time_config, anchor, today, lag_months)?;

    let rewrites = merged_rewrites(registry, request, request.level.entity_type());
    let parent = resolve_parent(registry, request)?;

    let spec = effective_filters(request);
    let plan = filter::build(request.level, &spec, parent, &rewrites)?;

    let needs_disproportionality = request
        .methods
        .iter()
        .any(|m| matches!(m, SignalMethod::Prr | SignalMethod::Ror | SignalMethod::Ebgm));
    let population_predicate = population_predicate(request, &spec)?;

    deadline.check()?;
    let bundle = aggregate::aggregate(
        store,
        &plan,
        &population_predicate,
        request.comparison_population,
        &resolved.time_info,
        request.min_events,
        needs_disproportionality,
    )?;
    deadline.check()?;

    let mut notes = NoteCollector::new();
    for warning in &plan.warnings {
        notes.push(warning.clone());
    }
    for note in &resolved.notes {
        notes.push(note.clone());
    }
    completeness_note(&resolved, &mut notes);

    if bundle.entities.is_empty() {
        notes.push("no events matched filters".into());
        return Ok(empty_response(request, &resolved, notes));
    }

    let thresholds = Thresholds::with_overrides(&request.thresholds);
    let target_idx = zscore_target(&bundle.months, request, &mut notes);
    let rolling_window = resolved
        .time_info
        .rolling_window
        .unwrap_or(request.time_config.rolling_window_months);

    let mut scored: Vec<SignalResult> = Vec::with_capacity(bundle.entities.len());
    for entity in &bundle.entities {
        let method_results =
            score_entity(entity, &bundle, request, &thresholds, target_idx, rolling_window, &mut notes);

        // Entities where no method could compute anything (no value and no
        // diagnostic baseline) carry no information at all.
        if method_results
            .iter()
            .all(|r| r.value.is_none() && r.details.is_none())
        {
            continue;
        }

        let signal_type = classify::overall_strength(&method_results);
        let change_pct = match entity.comparison_total {
            Some(comparison) if comparison > 0 => Some(
                (entity.counts.total as f64 - comparison as f64) * 100.0 / comparison as f64,
            ),
            _ => None,
        };

        scored.push(SignalResult {
            entity: entity.entity.clone(),
            entity_level: request.level,
            total_events: entity.counts.total,
            deaths: entity.counts.deaths,
            injuries: entity.counts.injuries,
            malfunctions: entity.counts.malfunctions,
            current_period_events: entity.comparison_total.map(|_| entity.counts.total),
            comparison_period_events: entity.comparison_total,
            change_pct,
            method_results,
            signal_type,
            has_children: false,
            child_level: request.level.child(),
        });
    }

    let counts = SignalCounts {
        high: scored.iter().filter(|r| r.signal_type == SignalStrength::High).count(),
        elevated: scored
            .iter()
            .filter(|r| r.signal_type == SignalStrength::Elevated)
            .count(),
        normal: scored
            .iter()
            .filter(|r| r.signal_type == SignalStrength::Normal)
            .count(),
        total_entities_analyzed: scored.len(),
    };

    scored.sort_by(|a, b| {
        b.signal_type
            .cmp(&a.signal_type)
            .then_with(|| b.total_events.cmp(&a.total_events))
            .then_with(|| a.entity.cmp(&b.entity))
    });
    scored.truncate(limit);

    probe_children(store, registry, request, &plan, &resolved.time_info, &deadline, &mut scored)?;

    debug!(entities = counts.total_entities_analyzed, "detection complete");
    Ok(SignalResponse {
        level: request.level,
        parent_value: request.parent_value.clone(),
        methods_applied: request.methods.clone(),
        time_info: resolved.time_info.clone(),
        data_completeness: Some(resolved.completeness.clone()),
        data_note: notes.render(),
        counts,
        signals: scored,
    })
}

fn validate(request: &SignalRequest) -> EngineResult<()> {
    if request.methods.is_empty() {
        return Err(SignalError::BadRequest("methods must not be empty".into()));
    }
    if request.min_events < 1 {
        return Err(SignalError::BadRequest("min_events must be at least 1".into()));
    }
    if request.limit < 1 {
        return Err(SignalError::BadRequest("limit must be at least 1".into()));
    }
    if request.comparison_population == ComparisonPopulation::Custom
        && request.comparison_filters.is_none()
    {
        return Err(SignalError::BadRequest(
            "custom comparison population requires comparison_filters".into(),
        ));
    }
    Ok(())
}

/// Registry groups for the level's entity type, with request-supplied groups
/// taking precedence (they come first, and the rewrite resolution keeps the
/// earliest claim of every member).
fn merged_rewrites(
    registry: &GroupRegistry,
    request: &SignalRequest,
    entity_type: Option<EntityType>,
) -> Vec<GroupRewrite> {
    let Some(entity_type) = entity_type else {
        return Vec::new();
    };

    let mut rewrites: Vec<GroupRewrite> = Vec::new();
    let mut taken_ids: Vec<String> = Vec::new();
    if let Some(request_groups) = &request.active_groups {
        for group in request_groups.iter().filter(|g| g.entity_type == entity_type) {
            taken_ids.push(group.id.clone());
            rewrites.push(GroupRewrite {
                display_name: group.display_name.clone(),
                members: group.members.clone(),
            });
        }
    }
    for group in registry.active_groups(entity_type) {
        if taken_ids.iter().any(|id| *id == group.id) {
            continue;
        }
        rewrites.push(GroupRewrite {
            display_name: group.display_name.clone(),
            members: group.members.clone(),
        });
    }
    rewrites
}

/// Resolve the drill-down parent pin, expanding grouped display names so the
/// caller drills into the grouped set.
fn resolve_parent(
    registry: &GroupRegistry,
    request: &SignalRequest,
) -> EngineResult<Option<(DrillLevel, Vec<String>)>> {
    let Some(parent_value) = &request.parent_value else {
        return Ok(None);
    };
    let Some(parent_level) = request.level.parent() else {
        // A parent pin is meaningless at the top level.
        return Ok(None);
    };

    let values = expand_entity(registry, request, parent_level, parent_value);
    Ok(Some((parent_level, values)))
}

/// Raw values an entity name expands to: a grouped display name covers its
/// members plus itself.
fn expand_entity(
    registry: &GroupRegistry,
    request: &SignalRequest,
    level: DrillLevel,
    entity: &str,
) -> Vec<String> {
    for rewrite in merged_rewrites(registry, request, level.entity_type()) {
        if rewrite.display_name == entity {
            return rewrite.expansion();
        }
    }
    vec![entity.to_string()]
}

/// Request filters folded into one spec; the request's convenience fields win
/// over the embedded filter spec.
fn effective_filters(request: &SignalRequest) -> FilterSpec {
    let mut spec = request.filters.clone().unwrap_or_default();
    if request.product_codes.is_some() {
        spec.product_codes = request.product_codes.clone();
    }
    if request.event_types.is_some() {
        spec.event_types = request.event_types.clone();
    }
    spec
}

/// Predicate for the disproportionality denominator: the non-entity filters
/// only, with no parent pin and no entity restriction.
fn population_predicate(
    request: &SignalRequest,
    spec: &FilterSpec,
) -> EngineResult<Predicate> {
    let spec = match request.comparison_population {
        ComparisonPopulation::Custom => request
            .comparison_filters
            .clone()
            .expect("validated"),
        _ => spec.clone(),
    };
    // Built at the top level so the device join is only required when a
    // device filter demands it; the population spans master events.
    let plan = filter::build(DrillLevel::Manufacturer, &spec, None, &[])?;
    Ok(plan.predicate)
}

/// Month a z-score targets: the configured month when it falls inside the
/// window, else the latest month.
fn zscore_target(months: &[MonthKey], request: &SignalRequest, notes: &mut NoteCollector) -> usize {
    let latest = months.len().saturating_sub(1);
    let Some(configured) = request.time_config.comparison_month else {
        return latest;
    };
    let key = MonthKey::from_date(configured);
    match months.iter().position(|m| *m == key) {
        Some(idx) => idx,
        None => {
            notes.push(format!(
                "comparison month {key} is outside the analysis window; using the latest month"
            ));
            latest
        }
    }
}

fn score_entity(
    entity: &EntityAggregate,
    bundle: &AggregateBundle,
    request: &SignalRequest,
    thresholds: &Thresholds,
    target_idx: usize,
    rolling_window: u32,
    notes: &mut NoteCollector,
) -> Vec<MethodResult> {
    let table = bundle.population_for(&entity.entity).map(|pop| {
        let a = entity.counts.deaths;
        let b = entity.counts.total - entity.counts.deaths;
        let c = pop.deaths.saturating_sub(a);
        let d = (pop.total.saturating_sub(pop.deaths)).saturating_sub(b);
        (a, b, c, d)
    });

    let input = MethodInput {
        series: &entity.series,
        months: &bundle.months,
        target_idx,
        rolling_window,
        current_events: entity.counts.total,
        comparison_events: entity.comparison_total,
        table,
    };
    let gates = GateContext {
        deaths: entity.counts.deaths,
        current_events: entity.counts.total,
        min_events: request.min_events,
    };

    request
        .methods
        .iter()
        .map(|method| {
            let measure = run_method(*method, &input);
            if let Some(note) = &measure.note {
                notes.push(format!("{}: {note}", method.as_str()));
            }
            classify::classify(*method, measure, thresholds, gates)
        })
        .collect()
}

/// Existence probe at the child level for each returned entity. Bounded: one
/// short-circuiting store call per row, never a full re-aggregation.
fn probe_children(
    store: &dyn EventStore,
    registry: &GroupRegistry,
    request: &SignalRequest,
    plan: &QueryPlan,
    time_info: &TimeInfo,
    deadline: &Deadline,
    scored: &mut [SignalResult],
) -> EngineResult<()> {
    let Some(child_level) = request.level.child() else {
        return Ok(());
    };
    let window = DateWindow {
        start: time_info.analysis_start,
        end: time_info.analysis_end,
    };

    for row in scored.iter_mut() {
        deadline.check()?;
        let mut predicate = plan.predicate.clone();
        predicate.conditions.push(Condition::EntityIn {
            level: request.level,
            values: expand_entity(registry, request, request.level, &row.entity),
        });
        predicate.needs_device_join = true;
        row.has_children = store
            .exists_at_level(child_level, &predicate, window)
            .map_err(|e| SignalError::StoreUnavailable(e.to_string()))?;
        if !row.has_children {
            row.child_level = None;
        }
    }
    Ok(())
}

fn completeness_note(resolved: &ResolvedWindows, notes: &mut NoteCollector) {
    let last_complete = resolved.completeness.last_complete_month;
    if resolved.time_info.analysis_end > last_complete.last_day() {
        notes.push(format!(
            "analysis window extends past the last complete month ({last_complete}); \
             recent counts may rise as reports arrive"
        ));
    }
}

fn empty_response(
    request: &SignalRequest,
    resolved: &ResolvedWindows,
    notes: NoteCollector,
) -> SignalResponse {
    SignalResponse {
        level: request.level,
        parent_value: request.parent_value.clone(),
        methods_applied: request.methods.clone(),
        time_info: resolved.time_info.clone(),
        data_completeness: Some(resolved.completeness.clone()),
        data_note: notes.render(),
        counts: SignalCounts::default(),
        signals: Vec::new(),
    }
}

/// Deduplicating note sink; repeated notes render once with a multiplier.
struct NoteCollector {
    counts: BTreeMap<String, usize>,
    order: Vec<String>,
}

impl NoteCollector {
    fn new() -> Self {
        Self { counts: BTreeMap::new(), order: Vec::new() }
    }

    fn push(&mut self, note: String) {
        match self.counts.get_mut(&note) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(note.clone(), 1);
                self.order.push(note);
            }
        }
    }

    fn render(&self) -> Option<String> {
        if self.order.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .order
            .iter()
            .map(|note| {
                let count = self.counts[note];
                if count > 1 {
                    format!("{note} (x{count})")
                } else {
                    note.clone()
                }
            })
            .collect();
        Some(parts.join("; "))
    }
}
