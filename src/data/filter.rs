//! Filter specifications and their translation into store predicates.
//!
//! The builder produces a structured predicate (condition tree plus a
//! device-join flag) and an entity expression; store adapters translate
//! both, so no storage dialect leaks above this module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{SignalError, SignalResult};
use crate::signals::types::DrillLevel;

/// Which event date a range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    #[default]
    DateReceived,
    DateOfEvent,
}

/// External filter specification, as supplied by callers.
///
/// Field names follow the presentation tier's camelCase contract; unknown
/// fields are rejected rather than silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct FilterSpec {
    pub manufacturers: Option<Vec<String>>,
    pub product_codes: Option<Vec<String>>,
    /// External codes `D`/`I`/`M`/`O`; translated to store codes here.
    pub event_types: Option<Vec<String>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub date_field: Option<DateField>,
    /// Substring search over event narratives.
    pub free_text: Option<String>,
    pub brand_names: Option<Vec<String>>,
    pub generic_names: Option<Vec<String>>,
    pub device_manufacturers: Option<Vec<String>>,
    pub model_numbers: Option<Vec<String>>,
    pub implant_flag: Option<String>,
    pub device_product_codes: Option<Vec<String>>,
}

/// Master-row columns addressable by predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterColumn {
    ManufacturerClean,
    ProductCode,
}

/// Device-row columns addressable by predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceColumn {
    BrandName,
    GenericName,
    ManufacturerDClean,
    ModelNumber,
    DeviceReportProductCode,
    ImplantFlag,
}

/// A single predicate condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Inclusive date range over the selected date field.
    DateBetween {
        field: DateField,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    /// Event type membership, in store codes (`D`/`IN`/`M`/`O`).
    EventTypeIn(Vec<String>),
    MasterIn {
        column: MasterColumn,
        values: Vec<String>,
    },
    DeviceIn {
        column: DeviceColumn,
        values: Vec<String>,
    },
    /// Narrative contains the given text, case-insensitive.
    NarrativeContains(String),
    /// Pin to entity values at a level; used for drill-down parents.
    EntityIn {
        level: DrillLevel,
        values: Vec<String>,
    },
}

impl Condition {
    /// Whether this condition constrains the devices relation.
    pub fn is_device_side(&self) -> bool {
        match self {
            Condition::DeviceIn { .. } => true,
            Condition::EntityIn { level, .. } => *level != DrillLevel::Manufacturer,
            _ => false,
        }
    }
}

/// Structured predicate handed to store adapters.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    pub conditions: Vec<Condition>,
    /// True when the devices relation must participate (device filters or a
    /// device-level entity expression).
    pub needs_device_join: bool,
}

/// One active alias group, reduced to what the rewrite needs.
#[derive(Debug, Clone)]
pub struct GroupRewrite {
    pub display_name: String,
    pub members: Vec<String>,
}

impl GroupRewrite {
    pub fn matches(&self, raw: &str) -> bool {
        self.members.iter().any(|m| m == raw)
    }

    /// Raw values a drill-down into this group's display name expands to.
    pub fn expansion(&self) -> Vec<String> {
        let mut values = self.members.clone();
        if !values.iter().any(|v| v == &self.display_name) {
            values.push(self.display_name.clone());
        }
        values
    }
}

/// Derived entity column: a raw level value mapped through active rewrites.
/// The first rewrite in insertion order wins when several match.
#[derive(Debug, Clone)]
pub struct EntityExpr {
    pub level: DrillLevel,
    pub rewrites: Vec<GroupRewrite>,
}

impl EntityExpr {
    pub fn identity(level: DrillLevel) -> Self {
        Self { level, rewrites: Vec::new() }
    }

    /// Apply the rewrite to one raw value.
    pub fn rewrite(&self, raw: &str) -> String {
        for rewrite in &self.rewrites {
            if rewrite.matches(raw) {
                return rewrite.display_name.clone();
            }
        }
        raw.to_string()
    }
}

/// Predicate plus entity expression plus any builder warnings.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub predicate: Predicate,
    pub entity_expr: EntityExpr,
    pub warnings: Vec<String>,
}

/// Translate an external event-type code into the store code.
/// `*` is reserved and never accepted as a filter value.
pub fn store_event_type(code: &str) -> SignalResult<String> {
    match code.trim().to_uppercase().as_str() {
        "D" => Ok("D".to_string()),
        "I" => Ok("IN".to_string()),
        "M" => Ok("M".to_string()),
        "O" => Ok("O".to_string()),
        other => Err(SignalError::BadFilter(format!(
            "unknown event type code '{other}'"
        ))),
    }
}

/// Build the predicate and entity expression for one aggregation pass.
///
/// `parent` pins drill-down context: the parent level together with the raw
/// values the parent entity expands to (group members plus the display name
/// when the parent is a grouped entity).
pub fn build(
    level: DrillLevel,
    spec: &FilterSpec,
    parent: Option<(DrillLevel, Vec<String>)>,
    active_groups: &[GroupRewrite],
) -> SignalResult<QueryPlan> {
    let mut conditions = Vec::new();

    if let (Some(from), Some(to)) = (spec.date_from, spec.date_to) {
        if from > to {
            return Err(SignalError::BadFilter(format!(
                "dateFrom {from} is after dateTo {to}"
            )));
        }
    }
    if spec.date_from.is_some() || spec.date_to.is_some() {
        conditions.push(Condition::DateBetween {
            field: spec.date_field.unwrap_or_default(),
            from: spec.date_from,
            to: spec.date_to,
        });
    }

    if let Some(codes) = non_empty(&spec.event_types) {
        let store_codes = codes
            .iter()
            .map(|c| store_event_type(c))
            .collect::<SignalResult<Vec<_>>>()?;
        conditions.push(Condition::EventTypeIn(store_codes));
    }
    if let Some(values) = non_empty(&spec.manufacturers) {
        conditions.push(Condition::MasterIn {
            column: MasterColumn::ManufacturerClean,
            values,
        });
    }
    if let Some(values) = non_empty(&spec.product_codes) {
        conditions.push(Condition::MasterIn {
            column: MasterColumn::ProductCode,
            values,
        });
    }
    if let Some(values) = non_empty(&spec.brand_names) {
        conditions.push(Condition::DeviceIn { column: DeviceColumn::BrandName, values });
    }
    if let Some(values) = non_empty(&spec.generic_names) {
        conditions.push(Condition::DeviceIn { column: DeviceColumn::GenericName, values });
    }
    if let Some(values) = non_empty(&spec.device_manufacturers) {
        conditions.push(Condition::DeviceIn {
            column: DeviceColumn::ManufacturerDClean,
            values,
        });
    }
    if let Some(values) = non_empty(&spec.model_numbers) {
        conditions.push(Condition::DeviceIn { column: DeviceColumn::ModelNumber, values });
    }
    if let Some(values) = non_empty(&spec.device_product_codes) {
        conditions.push(Condition::DeviceIn {
            column: DeviceColumn::DeviceReportProductCode,
            values,
        });
    }
    if let Some(flag) = &spec.implant_flag {
        let flag = flag.trim().to_uppercase();
        if flag != "Y" && flag != "N" {
            return Err(SignalError::BadFilter(format!(
                "implantFlag must be Y or N, got '{flag}'"
            )));
        }
        conditions.push(Condition::DeviceIn {
            column: DeviceColumn::ImplantFlag,
            values: vec![flag],
        });
    }
    if let Some(text) = &spec.free_text {
        let text = text.trim();
        if !text.is_empty() {
            conditions.push(Condition::NarrativeContains(text.to_lowercase()));
        }
    }

    if let Some((parent_level, values)) = parent {
        if values.is_empty() {
            return Err(SignalError::BadFilter("empty parent pin".into()));
        }
        conditions.push(Condition::EntityIn { level: parent_level, values });
    }

    let (entity_expr, warnings) = resolve_rewrites(level, active_groups);

    let needs_device_join =
        level != DrillLevel::Manufacturer || conditions.iter().any(Condition::is_device_side);

    Ok(QueryPlan {
        predicate: Predicate { conditions, needs_device_join },
        entity_expr,
        warnings,
    })
}

/// Overlapping active groups normally cannot exist; if they do, the first in
/// insertion order keeps the member and a warning is surfaced in `data_note`.
fn resolve_rewrites(level: DrillLevel, groups: &[GroupRewrite]) -> (EntityExpr, Vec<String>) {
    let mut warnings = Vec::new();
    let mut claimed: Vec<String> = Vec::new();
    let mut rewrites = Vec::new();

    for group in groups {
        let mut members = Vec::new();
        for member in &group.members {
            let folded = member.to_lowercase();
            if claimed.contains(&folded) {
                warnings.push(format!(
                    "entity '{member}' is claimed by more than one active group; \
                     keeping the earliest assignment"
                ));
                continue;
            }
            claimed.push(folded);
            members.push(member.clone());
        }
        if !members.is_empty() {
            rewrites.push(GroupRewrite {
                display_name: group.display_name.clone(),
                members,
            });
        }
    }

    (EntityExpr { level, rewrites }, warnings)
}

fn non_empty(values: &Option<Vec<String>>) -> Option<Vec<String>> {
    values.as_ref().and_then(|v| {
        let cleaned: Vec<String> = v
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    })
}
