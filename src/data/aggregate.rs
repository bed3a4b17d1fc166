//! Entity aggregation: per-entity totals, contiguous monthly series, and
//! comparison-population counters for disproportionality.

use std::collections::{BTreeSet, HashMap};

use crate::data::filter::{Condition, MasterColumn, Predicate, QueryPlan};
use crate::data::store::{
    DateWindow, EntityQuery, EventStore, OutcomeCounts, PopulationCounts, StoreError,
};
use crate::error::{SignalError, SignalResult};
use crate::signals::types::{ComparisonPopulation, MonthKey, TimeInfo};

/// Aggregated view of one entity over the analysis window.
#[derive(Debug, Clone)]
pub struct EntityAggregate {
    pub entity: String,
    pub counts: OutcomeCounts,
    /// Monthly totals aligned with [`AggregateBundle::months`]; missing
    /// months are zero-filled so every series shares one denominator.
    pub series: Vec<u64>,
    pub comparison_total: Option<u64>,
}

/// Everything the method layer needs for one detection pass.
#[derive(Debug, Default)]
pub struct AggregateBundle {
    /// Contiguous months spanning the analysis window.
    pub months: Vec<MonthKey>,
    pub entities: Vec<EntityAggregate>,
    /// Population counters when one population serves every entity.
    pub population: Option<PopulationCounts>,
    /// Per-entity population counters for `same_product_code`.
    pub per_entity_population: HashMap<String, PopulationCounts>,
}

impl AggregateBundle {
    /// Population counters applicable to `entity`.
    pub fn population_for(&self, entity: &str) -> Option<PopulationCounts> {
        self.per_entity_population
            .get(entity)
            .copied()
            .or(self.population)
    }
}

/// Aggregate the corpus for one detection pass.
///
/// Entities totalling fewer than `min_events` in the analysis window are
/// dropped before any statistics run.
pub fn aggregate(
    store: &dyn EventStore,
    plan: &QueryPlan,
    population_predicate: &Predicate,
    comparison_population: ComparisonPopulation,
    time_info: &TimeInfo,
    min_events: u64,
    needs_disproportionality: bool,
) -> SignalResult<AggregateBundle> {
    let window = DateWindow {
        start: time_info.analysis_start,
        end: time_info.analysis_end,
    };
    let query = EntityQuery {
        expr: &plan.entity_expr,
        predicate: &plan.predicate,
        window,
    };

    let rows = store.entity_month_outcomes(&query).map_err(store_err)?;

    let months = MonthKey::range(
        MonthKey::from_date(time_info.analysis_start),
        MonthKey::from_date(time_info.analysis_end),
    );
    let index_of: HashMap<MonthKey, usize> =
        months.iter().enumerate().map(|(i, m)| (*m, i)).collect();

    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, OutcomeCounts> = HashMap::new();
    let mut series: HashMap<String, Vec<u64>> = HashMap::new();
    for row in rows {
        if !totals.contains_key(&row.entity) {
            order.push(row.entity.clone());
            series.insert(row.entity.clone(), vec![0; months.len()]);
        }
        totals.entry(row.entity.clone()).or_default().add(row.counts);
        if let Some(&idx) = index_of.get(&row.month) {
            series.get_mut(&row.entity).expect("series exists")[idx] = row.counts.total;
        }
    }

    let mut entities: Vec<EntityAggregate> = order
        .into_iter()
        .filter_map(|entity| {
            let counts = totals.remove(&entity)?;
            if counts.total < min_events {
                return None;
            }
            let series = series.remove(&entity)?;
            Some(EntityAggregate {
                entity,
                counts,
                series,
                comparison_total: None,
            })
        })
        .collect();
    entities.sort_by(|a, b| b.counts.total.cmp(&a.counts.total).then_with(|| a.entity.cmp(&b.entity)));

    let mut bundle = AggregateBundle {
        months,
        entities,
        population: None,
        per_entity_population: HashMap::new(),
    };

    if bundle.entities.is_empty() {
        return Ok(bundle);
    }

    if let (Some(start), Some(end)) = (time_info.comparison_start, time_info.comparison_end) {
        attach_comparison_totals(store, plan, DateWindow { start, end }, &mut bundle)?;
    }

    if needs_disproportionality {
        attach_population(
            store,
            plan,
            population_predicate,
            comparison_population,
            window,
            &mut bundle,
        )?;
    }

    Ok(bundle)
}

fn attach_comparison_totals(
    store: &dyn EventStore,
    plan: &QueryPlan,
    window: DateWindow,
    bundle: &mut AggregateBundle,
) -> SignalResult<()> {
    let query = EntityQuery {
        expr: &plan.entity_expr,
        predicate: &plan.predicate,
        window,
    };
    let rows = store.entity_period_totals(&query).map_err(store_err)?;
    let by_entity: HashMap<String, u64> =
        rows.into_iter().map(|r| (r.entity, r.total)).collect();
    for entity in &mut bundle.entities {
        entity.comparison_total = Some(by_entity.get(&entity.entity).copied().unwrap_or(0));
    }
    Ok(())
}

/// Attach death/total counters for the comparison population.
///
/// `all` and `custom` use a single population; `same_product_code` restricts
/// each entity's population to the product codes that entity reports under.
fn attach_population(
    store: &dyn EventStore,
    plan: &QueryPlan,
    population_predicate: &Predicate,
    comparison_population: ComparisonPopulation,
    window: DateWindow,
    bundle: &mut AggregateBundle,
) -> SignalResult<()> {
    match comparison_population {
        ComparisonPopulation::All | ComparisonPopulation::Custom => {
            let counts = store
                .population_outcomes(population_predicate, window)
                .map_err(store_err)?;
            bundle.population = Some(counts);
        }
        ComparisonPopulation::SameProductCode => {
            // A request that already pins product codes shares one population.
            if has_explicit_product_codes(population_predicate) {
                let counts = store
                    .population_outcomes(population_predicate, window)
                    .map_err(store_err)?;
                bundle.population = Some(counts);
                return Ok(());
            }

            let query = EntityQuery {
                expr: &plan.entity_expr,
                predicate: &plan.predicate,
                window,
            };
            let entity_codes = store.entity_code_outcomes(&query).map_err(store_err)?;
            let code_pop = store
                .code_population_outcomes(population_predicate, window)
                .map_err(store_err)?;
            let pop_by_code: HashMap<String, PopulationCounts> = code_pop
                .into_iter()
                .map(|r| {
                    (
                        r.product_code,
                        PopulationCounts { total: r.total, deaths: r.deaths },
                    )
                })
                .collect();

            let mut codes_by_entity: HashMap<String, BTreeSet<String>> = HashMap::new();
            for row in entity_codes {
                codes_by_entity
                    .entry(row.entity)
                    .or_default()
                    .insert(row.product_code);
            }
            for entity in &bundle.entities {
                let mut counts = PopulationCounts::default();
                if let Some(codes) = codes_by_entity.get(&entity.entity) {
                    for code in codes {
                        if let Some(pop) = pop_by_code.get(code) {
                            counts.total += pop.total;
                            counts.deaths += pop.deaths;
                        }
                    }
                }
                bundle
                    .per_entity_population
                    .insert(entity.entity.clone(), counts);
            }
        }
    }
    Ok(())
}

fn has_explicit_product_codes(predicate: &Predicate) -> bool {
    predicate.conditions.iter().any(|c| {
        matches!(
            c,
            Condition::MasterIn { column: MasterColumn::ProductCode, .. }
        )
    })
}

fn store_err(err: StoreError) -> SignalError {
    SignalError::StoreUnavailable(err.to_string())
}
