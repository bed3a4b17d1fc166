//! End-to-end detection scenarios against the in-memory store.

use chrono::NaiveDate;
use maude_sentinel::data::memory::{DeviceRecord, EventRecord, MemStore};
use maude_sentinel::error::SignalError;
use maude_sentinel::groups::{EntityType, GroupRegistry};
use maude_sentinel::signals::detect;
use maude_sentinel::signals::types::{
    ActiveGroup, DrillLevel, SignalMethod, SignalRequest, SignalResponse, SignalStrength,
    TimeComparisonConfig, TimeMode,
};

const LAG_MONTHS: u32 = 2;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    date(2026, 1, 10)
}

struct Fixture {
    events: Vec<EventRecord>,
    devices: Vec<DeviceRecord>,
    next_key: u64,
}

impl Fixture {
    fn new() -> Self {
        Self { events: Vec::new(), devices: Vec::new(), next_key: 1 }
    }

    fn push_events(
        &mut self,
        manufacturer: &str,
        product_code: &str,
        year: i32,
        month: u32,
        count: u64,
        event_type: &str,
        brand: Option<&str>,
    ) {
        for i in 0..count {
            let key = format!("MDR-{:07}", self.next_key);
            self.next_key += 1;
            let day = (i % 27 + 1) as u32;
            self.events.push(EventRecord {
                mdr_report_key: key.clone(),
                date_received: date(year, month, day),
                date_of_event: None,
                event_type: event_type.to_string(),
                manufacturer_clean: Some(manufacturer.to_string()),
                product_code: Some(product_code.to_string()),
            });
            if let Some(brand) = brand {
                self.devices.push(DeviceRecord {
                    mdr_report_key: key,
                    brand_name: Some(brand.to_string()),
                    generic_name: Some("CARDIAC PACEMAKER".to_string()),
                    model_number: Some(format!("{}-100", &brand[..1])),
                    manufacturer_d_clean: Some(manufacturer.to_string()),
                    device_report_product_code: Some(product_code.to_string()),
                    implant_flag: Some("Y".to_string()),
                });
            }
        }
    }

    fn store(self) -> MemStore {
        MemStore::new(self.events, self.devices, Vec::new())
    }
}

/// Corpus anchored on December 2025.
fn fixture_store() -> MemStore {
    let mut fx = Fixture::new();

    // Flat history with a December spike: eleven months of 10 then 100.
    for month in 1..=11 {
        fx.push_events("ACME MEDICAL", "DZE", 2025, month, 10, "M", None);
    }
    fx.push_events("ACME MEDICAL", "DZE", 2025, 12, 100, "M", None);

    // Noisy history with a genuine December spike.
    let zenith: [u64; 12] = [8, 12, 9, 11, 10, 9, 10, 11, 10, 9, 12, 30];
    for (idx, count) in zenith.iter().enumerate() {
        fx.push_events("ZENITH DEVICES", "DZE", 2025, idx as u32 + 1, *count, "M", None);
    }

    // Grouped manufacturers with devices, for rewrite and drill-down.
    for month in 1..=12 {
        fx.push_events("Abbott", "NVZ", 2025, month, 2, "M", Some("TREX PACER"));
        fx.push_events("St Jude Medical", "NVZ", 2025, month, 1, "M", Some("SJM QUADRA"));
    }

    // Year-over-year pair: active both years versus 2025-only.
    for month in 1..=12 {
        fx.push_events("STEADY CORP", "QRS", 2024, month, 4, "M", None);
    }
    for month in 1..=10 {
        fx.push_events("STEADY CORP", "QRS", 2025, month, 10, "M", None);
    }
    for month in 1..=10 {
        fx.push_events("NOVA SURGICAL", "QRS", 2025, month, 5, "M", None);
    }

    // Disproportionality corner: few deaths, many deaths, and background.
    fx.push_events("RARE DEATHS INC", "DIS", 2025, 3, 2, "D", None);
    for month in 1..=10 {
        fx.push_events("RARE DEATHS INC", "DIS", 2025, month, 10, "M", None);
    }
    fx.push_events("DEADLY LLC", "DIS", 2025, 6, 10, "D", None);
    for month in 1..=8 {
        fx.push_events("DEADLY LLC", "DIS", 2025, month, 5, "M", None);
    }
    for month in 1..=12 {
        fx.push_events("BACKGROUND CORP", "DIS", 2025, month, 50, "M", None);
        fx.push_events("BACKGROUND CORP", "DIS", 2025, month, 3, "D", None);
    }

    // Injury-only entity for the event-type round trip.
    for month in 1..=12 {
        fx.push_events("INJURY CO", "INJ", 2025, month, 4, "IN", None);
    }

    fx.store()
}

fn registry() -> GroupRegistry {
    GroupRegistry::open_in_memory().unwrap()
}

fn abbott_family() -> ActiveGroup {
    ActiveGroup {
        id: "abbott-family".to_string(),
        display_name: "Abbott-family".to_string(),
        members: vec!["Abbott".to_string(), "St Jude Medical".to_string()],
        entity_type: EntityType::Manufacturer,
    }
}

fn lookback_request(methods: Vec<SignalMethod>, min_events: u64) -> SignalRequest {
    SignalRequest {
        methods,
        time_config: TimeComparisonConfig {
            mode: TimeMode::Lookback,
            lookback_months: 12,
            ..TimeComparisonConfig::default()
        },
        min_events,
        limit: 50,
        ..SignalRequest::default()
    }
}

fn run(store: &MemStore, request: &SignalRequest) -> SignalResponse {
    detect(store, &registry(), request, today(), LAG_MONTHS).unwrap()
}

fn entity<'a>(
    response: &'a SignalResponse,
    name: &str,
) -> &'a maude_sentinel::signals::types::SignalResult {
    response
        .signals
        .iter()
        .find(|r| r.entity == name)
        .unwrap_or_else(|| panic!("entity {name} missing from response"))
}

#[test]
fn flat_history_yields_null_zscore() {
    let store = fixture_store();
    let response = run(&store, &lookback_request(vec![SignalMethod::Zscore], 1));

    let acme = entity(&response, "ACME MEDICAL");
    assert_eq!(acme.total_events, 210);
    let zscore = &acme.method_results[0];
    assert!(zscore.value.is_none(), "flat baseline must not score");
    assert!(!zscore.is_signal);
    assert_eq!(zscore.signal_strength, SignalStrength::Normal);
}

#[test]
fn noisy_history_with_spike_scores_high() {
    let store = fixture_store();
    let response = run(&store, &lookback_request(vec![SignalMethod::Zscore], 1));

    let zenith = entity(&response, "ZENITH DEVICES");
    let zscore = &zenith.method_results[0];
    let value = zscore.value.expect("computable z-score");
    assert!((value - 15.31).abs() < 0.05, "got {value}");
    assert_eq!(zscore.signal_strength, SignalStrength::High);
    assert_eq!(zenith.signal_type, SignalStrength::High);
}

#[test]
fn yoy_with_empty_comparison_is_null_and_noted() {
    let store = fixture_store();
    let request = SignalRequest {
        methods: vec![SignalMethod::Yoy],
        time_config: TimeComparisonConfig {
            mode: TimeMode::Yoy,
            current_year: Some(2025),
            comparison_year: Some(2024),
            ..TimeComparisonConfig::default()
        },
        min_events: 1,
        limit: 50,
        ..SignalRequest::default()
    };
    let response = run(&store, &request);

    let nova = entity(&response, "NOVA SURGICAL");
    let yoy = &nova.method_results[0];
    assert!(yoy.value.is_none());
    assert!(!yoy.is_signal);
    assert!(response
        .data_note
        .as_deref()
        .unwrap()
        .contains("comparison period empty"));

    // The entity with history in both years classifies normally.
    let steady = entity(&response, "STEADY CORP");
    let yoy = &steady.method_results[0];
    assert!((yoy.value.unwrap() - 108.33).abs() < 0.05);
    assert_eq!(yoy.signal_strength, SignalStrength::High);
    assert_eq!(steady.comparison_period_events, Some(48));
}

#[test]
fn prr_death_gate_suppresses_sparse_entities() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Prr], 1);
    request.product_codes = Some(vec!["DIS".to_string()]);
    let response = run(&store, &request);

    let rare = entity(&response, "RARE DEATHS INC");
    let prr = &rare.method_results[0];
    assert_eq!(rare.deaths, 2);
    assert!(!prr.is_signal, "a < 3 must never signal, got {prr:?}");
    assert_eq!(prr.signal_strength, SignalStrength::Normal);

    let deadly = entity(&response, "DEADLY LLC");
    let prr = &deadly.method_results[0];
    assert!(prr.is_signal);
    assert_eq!(prr.signal_strength, SignalStrength::High);
    assert!(prr.lower_ci.unwrap() >= 1.0, "CI gate must hold for signals");
}

#[test]
fn group_rewrite_collapses_members_into_one_row() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.active_groups = Some(vec![abbott_family()]);
    let response = run(&store, &request);

    let family = entity(&response, "Abbott-family");
    // 24 Abbott events plus 12 St Jude events.
    assert_eq!(family.total_events, 36);
    assert!(response.signals.iter().all(|r| r.entity != "Abbott"));
    assert!(response.signals.iter().all(|r| r.entity != "St Jude Medical"));
    assert!(family.has_children);
    assert_eq!(family.child_level, Some(DrillLevel::Brand));
}

#[test]
fn drill_down_into_a_group_scopes_to_member_events() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.level = DrillLevel::Brand;
    request.parent_value = Some("Abbott-family".to_string());
    request.active_groups = Some(vec![abbott_family()]);
    let response = run(&store, &request);

    let names: Vec<&str> = response.signals.iter().map(|r| r.entity.as_str()).collect();
    assert!(names.contains(&"TREX PACER"));
    assert!(names.contains(&"SJM QUADRA"));
    assert_eq!(entity(&response, "TREX PACER").total_events, 24);
    assert_eq!(entity(&response, "SJM QUADRA").total_events, 12);
    // Nothing outside the grouped manufacturers leaks in.
    assert_eq!(names.len(), 2);
}

#[test]
fn min_events_gate_holds_for_every_returned_entity() {
    let store = fixture_store();
    let response = run(&store, &lookback_request(vec![SignalMethod::Zscore], 100));
    assert!(!response.signals.is_empty());
    for row in &response.signals {
        assert!(row.total_events >= 100, "{} under the gate", row.entity);
    }
    assert!(response.signals.iter().all(|r| r.entity != "NOVA SURGICAL"));
}

#[test]
fn event_type_filter_round_trips_with_injury_counts() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.event_types = Some(vec!["I".to_string()]);
    let response = run(&store, &request);

    assert!(!response.signals.is_empty());
    for row in &response.signals {
        assert_eq!(row.injuries, row.total_events, "{}", row.entity);
    }
    assert_eq!(entity(&response, "INJURY CO").total_events, 48);
}

#[test]
fn adding_filters_never_increases_totals() {
    let store = fixture_store();
    let unfiltered = run(&store, &lookback_request(vec![SignalMethod::Zscore], 1));
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.product_codes = Some(vec!["DIS".to_string()]);
    let filtered = run(&store, &request);

    for row in &filtered.signals {
        let base = unfiltered.signals.iter().find(|r| r.entity == row.entity);
        let base_total = base.map(|r| r.total_events).unwrap_or(0);
        assert!(row.total_events <= base_total, "{}", row.entity);
    }
}

#[test]
fn results_sort_by_severity_then_volume() {
    let store = fixture_store();
    let response = run(&store, &lookback_request(vec![SignalMethod::Zscore], 1));

    let mut previous: Option<&maude_sentinel::signals::types::SignalResult> = None;
    for row in &response.signals {
        if let Some(prev) = previous {
            assert!(prev.signal_type >= row.signal_type);
            if prev.signal_type == row.signal_type {
                assert!(prev.total_events >= row.total_events);
            }
        }
        previous = Some(row);
    }
}

#[test]
fn counters_count_entities_not_methods() {
    let store = fixture_store();
    let response = run(
        &store,
        &lookback_request(vec![SignalMethod::Zscore, SignalMethod::Cusum], 1),
    );
    let counts = &response.counts;
    assert_eq!(
        counts.high + counts.elevated + counts.normal,
        counts.total_entities_analyzed
    );
}

#[test]
fn empty_match_returns_note_instead_of_error() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.product_codes = Some(vec!["ZZZ".to_string()]);
    let response = run(&store, &request);

    assert!(response.signals.is_empty());
    assert_eq!(response.counts.total_entities_analyzed, 0);
    assert!(response
        .data_note
        .as_deref()
        .unwrap()
        .contains("no events matched filters"));
}

#[test]
fn incomplete_months_produce_a_completeness_warning() {
    let store = fixture_store();
    // Today close to the anchor: recent months are still lag-affected.
    let request = lookback_request(vec![SignalMethod::Zscore], 1);
    let response = detect(&store, &registry(), &request, date(2026, 1, 10), LAG_MONTHS).unwrap();
    let completeness = response.data_completeness.as_ref().unwrap();
    assert!(!completeness.incomplete_months.is_empty());
    assert!(response.data_note.as_deref().unwrap().contains("last complete month"));

    // A much later "today" has aged every analysed month out of the lag.
    let response = detect(&store, &registry(), &request, date(2026, 8, 2), LAG_MONTHS).unwrap();
    let completeness = response.data_completeness.as_ref().unwrap();
    assert!(completeness.incomplete_months.is_empty());
    let note = response.data_note.unwrap_or_default();
    assert!(!note.contains("last complete month"), "unexpected warning: {note}");
}

#[test]
fn empty_methods_are_rejected() {
    let store = fixture_store();
    let request = lookback_request(Vec::new(), 1);
    let err = detect(&store, &registry(), &request, today(), LAG_MONTHS).unwrap_err();
    assert!(matches!(err, SignalError::BadRequest(_)));
}

#[test]
fn zero_deadline_times_out() {
    let store = fixture_store();
    let mut request = lookback_request(vec![SignalMethod::Zscore], 1);
    request.timeout_ms = Some(0);
    let err = detect(&store, &registry(), &request, today(), LAG_MONTHS).unwrap_err();
    assert!(matches!(err, SignalError::Timeout));
}

#[test]
fn cusum_flags_sustained_rise_in_full_run() {
    let mut fx = Fixture::new();
    for month in 1..=9 {
        fx.push_events("DRIFT CORP", "DZE", 2025, month, 10, "M", None);
    }
    for month in 10..=12 {
        fx.push_events("DRIFT CORP", "DZE", 2025, month, 18, "M", None);
    }
    let store = fx.store();
    let response = run(&store, &lookback_request(vec![SignalMethod::Cusum], 1));
    let drift = entity(&response, "DRIFT CORP");
    let cusum = &drift.method_results[0];
    assert!(cusum.value.unwrap() > 3.0);
    assert!(cusum.is_signal);
}

#[test]
fn rolling_method_tracks_recent_baseline() {
    let store = fixture_store();
    let request = SignalRequest {
        methods: vec![SignalMethod::Rolling],
        time_config: TimeComparisonConfig {
            mode: TimeMode::Rolling,
            lookback_months: 12,
            rolling_window_months: 3,
            ..TimeComparisonConfig::default()
        },
        min_events: 1,
        limit: 50,
        ..SignalRequest::default()
    };
    let response = run(&store, &request);
    let zenith = entity(&response, "ZENITH DEVICES");
    let rolling = &zenith.method_results[0];
    // Latest month 30 against the 9/12/... window preceding it.
    assert!(rolling.value.unwrap() > 2.0);
    assert_eq!(rolling.signal_strength, SignalStrength::High);
}
