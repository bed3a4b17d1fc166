//! Query-builder contract: predicate construction, event-code translation,
//! and group rewrites.

use maude_sentinel::data::filter::{
    build, store_event_type, Condition, FilterSpec, GroupRewrite,
};
use maude_sentinel::error::SignalError;
use maude_sentinel::signals::types::DrillLevel;

#[test]
fn event_codes_translate_to_store_codes() {
    assert_eq!(store_event_type("D").unwrap(), "D");
    assert_eq!(store_event_type("I").unwrap(), "IN");
    assert_eq!(store_event_type("i").unwrap(), "IN");
    assert_eq!(store_event_type("M").unwrap(), "M");
    assert_eq!(store_event_type("O").unwrap(), "O");
}

#[test]
fn unknown_and_reserved_codes_are_rejected() {
    assert!(matches!(store_event_type("*"), Err(SignalError::BadFilter(_))));
    assert!(matches!(store_event_type("X"), Err(SignalError::BadFilter(_))));
}

#[test]
fn inverted_date_range_is_a_bad_filter() {
    let spec = FilterSpec {
        date_from: Some("2025-06-01".parse().unwrap()),
        date_to: Some("2025-01-01".parse().unwrap()),
        ..FilterSpec::default()
    };
    let err = build(DrillLevel::Manufacturer, &spec, None, &[]).unwrap_err();
    assert!(matches!(err, SignalError::BadFilter(_)));
}

#[test]
fn unknown_filter_fields_are_rejected_at_the_boundary() {
    let raw = r#"{"manufacturers": ["ACME"], "frobnicate": true}"#;
    assert!(serde_json::from_str::<FilterSpec>(raw).is_err());
}

#[test]
fn camel_case_fields_round_trip() {
    let raw = r#"{
        "productCodes": ["DZE"],
        "eventTypes": ["I"],
        "brandNames": ["WIDGET"],
        "implantFlag": "Y",
        "freeText": "fracture"
    }"#;
    let spec: FilterSpec = serde_json::from_str(raw).unwrap();
    let plan = build(DrillLevel::Manufacturer, &spec, None, &[]).unwrap();

    assert!(plan.predicate.needs_device_join);
    assert!(plan
        .predicate
        .conditions
        .iter()
        .any(|c| matches!(c, Condition::EventTypeIn(codes) if codes == &vec!["IN".to_string()])));
    assert!(plan
        .predicate
        .conditions
        .iter()
        .any(|c| matches!(c, Condition::NarrativeContains(t) if t == "fracture")));
}

#[test]
fn master_only_filters_avoid_the_device_join() {
    let spec = FilterSpec {
        manufacturers: Some(vec!["ACME".to_string()]),
        product_codes: Some(vec!["DZE".to_string()]),
        ..FilterSpec::default()
    };
    let plan = build(DrillLevel::Manufacturer, &spec, None, &[]).unwrap();
    assert!(!plan.predicate.needs_device_join);

    // Any device-level aggregation forces the join regardless of filters.
    let plan = build(DrillLevel::Brand, &spec, None, &[]).unwrap();
    assert!(plan.predicate.needs_device_join);
}

#[test]
fn rewrite_is_identity_without_groups() {
    let plan = build(DrillLevel::Manufacturer, &FilterSpec::default(), None, &[]).unwrap();
    assert_eq!(plan.entity_expr.rewrite("ACME"), "ACME");
    assert!(plan.warnings.is_empty());
}

#[test]
fn rewrite_maps_members_to_display_name() {
    let groups = vec![GroupRewrite {
        display_name: "Abbott-family".to_string(),
        members: vec!["Abbott".to_string(), "St Jude Medical".to_string()],
    }];
    let plan = build(DrillLevel::Manufacturer, &FilterSpec::default(), None, &groups).unwrap();
    assert_eq!(plan.entity_expr.rewrite("Abbott"), "Abbott-family");
    assert_eq!(plan.entity_expr.rewrite("St Jude Medical"), "Abbott-family");
    assert_eq!(plan.entity_expr.rewrite("Medtronic"), "Medtronic");
}

#[test]
fn overlapping_groups_keep_first_claim_and_warn() {
    let groups = vec![
        GroupRewrite {
            display_name: "First".to_string(),
            members: vec!["ACME".to_string()],
        },
        GroupRewrite {
            display_name: "Second".to_string(),
            members: vec!["ACME".to_string(), "OTHER".to_string()],
        },
    ];
    let plan = build(DrillLevel::Manufacturer, &FilterSpec::default(), None, &groups).unwrap();
    assert_eq!(plan.entity_expr.rewrite("ACME"), "First");
    assert_eq!(plan.entity_expr.rewrite("OTHER"), "Second");
    assert_eq!(plan.warnings.len(), 1);
}

#[test]
fn group_expansion_includes_display_name() {
    let rewrite = GroupRewrite {
        display_name: "Abbott-family".to_string(),
        members: vec!["Abbott".to_string(), "St Jude Medical".to_string()],
    };
    let expansion = rewrite.expansion();
    assert!(expansion.contains(&"Abbott".to_string()));
    assert!(expansion.contains(&"Abbott-family".to_string()));
    assert_eq!(expansion.len(), 3);
}

#[test]
fn bad_implant_flag_is_rejected() {
    let spec = FilterSpec {
        implant_flag: Some("MAYBE".to_string()),
        ..FilterSpec::default()
    };
    assert!(build(DrillLevel::Manufacturer, &spec, None, &[]).is_err());
}
