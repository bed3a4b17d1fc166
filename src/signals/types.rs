//! Request/response vocabulary of the signal detection engine.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::data::filter::FilterSpec;
use crate::groups::EntityType;

/// Detection methods supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMethod {
    Zscore,
    Prr,
    Ror,
    Ebgm,
    Cusum,
    Yoy,
    Pop,
    Rolling,
}

impl SignalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalMethod::Zscore => "zscore",
            SignalMethod::Prr => "prr",
            SignalMethod::Ror => "ror",
            SignalMethod::Ebgm => "ebgm",
            SignalMethod::Cusum => "cusum",
            SignalMethod::Yoy => "yoy",
            SignalMethod::Pop => "pop",
            SignalMethod::Rolling => "rolling",
        }
    }
}

/// Hierarchical drill-down levels, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillLevel {
    Manufacturer,
    Brand,
    Generic,
    Model,
}

impl DrillLevel {
    /// Next-finer level, if any.
    pub fn child(&self) -> Option<DrillLevel> {
        match self {
            DrillLevel::Manufacturer => Some(DrillLevel::Brand),
            DrillLevel::Brand => Some(DrillLevel::Generic),
            DrillLevel::Generic => Some(DrillLevel::Model),
            DrillLevel::Model => None,
        }
    }

    /// Level whose value pins a drill-down into this one.
    pub fn parent(&self) -> Option<DrillLevel> {
        match self {
            DrillLevel::Manufacturer => None,
            DrillLevel::Brand => Some(DrillLevel::Manufacturer),
            DrillLevel::Generic => Some(DrillLevel::Brand),
            DrillLevel::Model => Some(DrillLevel::Generic),
        }
    }

    /// Entity-group kind applicable at this level. Models are never grouped.
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            DrillLevel::Manufacturer => Some(EntityType::Manufacturer),
            DrillLevel::Brand => Some(EntityType::Brand),
            DrillLevel::Generic => Some(EntityType::GenericName),
            DrillLevel::Model => None,
        }
    }
}

/// Calendar month, serialised as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid month start")
    }

    /// Last day of the month.
    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().expect("valid month end")
    }

    pub fn next(&self) -> MonthKey {
        if self.month == 12 {
            MonthKey { year: self.year + 1, month: 1 }
        } else {
            MonthKey { year: self.year, month: self.month + 1 }
        }
    }

    /// Contiguous inclusive month range.
    pub fn range(start: MonthKey, end: MonthKey) -> Vec<MonthKey> {
        let mut months = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            months.push(cursor);
            cursor = cursor.next();
        }
        months
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| serde::de::Error::custom("expected YYYY-MM"))?;
        let year: i32 = year.parse().map_err(serde::de::Error::custom)?;
        let month: u32 = month.parse().map_err(serde::de::Error::custom)?;
        if !(1..=12).contains(&month) {
            return Err(serde::de::Error::custom("month out of range"));
        }
        Ok(MonthKey { year, month })
    }
}

/// Time comparison modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    Lookback,
    Custom,
    Yoy,
    Rolling,
}

/// Inclusive date period for custom comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Time configuration of a detection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeComparisonConfig {
    pub mode: TimeMode,
    pub lookback_months: u32,
    pub period_a: Option<TimePeriod>,
    pub period_b: Option<TimePeriod>,
    pub current_year: Option<i32>,
    pub comparison_year: Option<i32>,
    pub quarter: Option<u8>,
    pub rolling_window_months: u32,
    /// Specific month to score for z-score; defaults to the latest month.
    pub comparison_month: Option<NaiveDate>,
}

impl Default for TimeComparisonConfig {
    fn default() -> Self {
        Self {
            mode: TimeMode::Lookback,
            lookback_months: 12,
            period_a: None,
            period_b: None,
            current_year: None,
            comparison_year: None,
            quarter: None,
            rolling_window_months: 3,
            comparison_month: None,
        }
    }
}

/// Comparison population for disproportionality methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPopulation {
    #[default]
    All,
    SameProductCode,
    Custom,
}

/// Group passed inline with a request, overriding the registry on conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveGroup {
    pub id: String,
    pub display_name: String,
    pub members: Vec<String>,
    pub entity_type: EntityType,
}

/// Per-method threshold overrides; unset fields keep the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdOverrides {
    pub zscore_high_threshold: Option<f64>,
    pub zscore_elevated_threshold: Option<f64>,
    pub prr_high_threshold: Option<f64>,
    pub prr_elevated_threshold: Option<f64>,
    pub ror_high_threshold: Option<f64>,
    pub ror_elevated_threshold: Option<f64>,
    pub ebgm_high_threshold: Option<f64>,
    pub ebgm_elevated_threshold: Option<f64>,
    pub cusum_high_threshold: Option<f64>,
    pub cusum_elevated_threshold: Option<f64>,
    pub change_pct_high: Option<f64>,
    pub change_pct_elevated: Option<f64>,
}

/// Advanced signal detection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalRequest {
    pub methods: Vec<SignalMethod>,
    pub time_config: TimeComparisonConfig,
    pub level: DrillLevel,
    pub parent_value: Option<String>,
    pub product_codes: Option<Vec<String>>,
    pub event_types: Option<Vec<String>>,
    /// Full filter specification; `product_codes`/`event_types` above win on
    /// overlap.
    pub filters: Option<FilterSpec>,
    pub comparison_population: ComparisonPopulation,
    pub comparison_filters: Option<FilterSpec>,
    pub active_groups: Option<Vec<ActiveGroup>>,
    pub min_events: u64,
    pub limit: usize,
    #[serde(flatten)]
    pub thresholds: ThresholdOverrides,
    /// Optional request deadline; checked at store boundaries.
    pub timeout_ms: Option<u64>,
}

impl Default for SignalRequest {
    fn default() -> Self {
        Self {
            methods: vec![SignalMethod::Zscore],
            time_config: TimeComparisonConfig::default(),
            level: DrillLevel::Manufacturer,
            parent_value: None,
            product_codes: None,
            event_types: None,
            filters: None,
            comparison_population: ComparisonPopulation::All,
            comparison_filters: None,
            active_groups: None,
            min_events: 10,
            limit: 20,
            thresholds: ThresholdOverrides::default(),
            timeout_ms: None,
        }
    }
}

/// Resolved analysis/comparison windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeInfo {
    pub mode: TimeMode,
    pub analysis_start: NaiveDate,
    pub analysis_end: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_end: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_window: Option<u32>,
}

/// Reporting-lag view of the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCompleteness {
    pub last_complete_month: MonthKey,
    pub incomplete_months: Vec<MonthKey>,
    pub estimated_lag_months: u32,
}

/// Signal strength, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    #[default]
    Normal,
    Elevated,
    High,
}

/// One point in a monthly series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyPoint {
    pub month: MonthKey,
    pub count: u64,
}

/// One point in a CUSUM trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CusumPoint {
    pub month: MonthKey,
    pub cusum: f64,
    pub count: u64,
}

/// Method-specific diagnostic payload. The `method` field of the enclosing
/// [`MethodResult`] discriminates which shape applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodDetails {
    Baseline {
        avg_monthly: f64,
        std_monthly: f64,
        latest_month: u64,
        monthly_series: Vec<MonthlyPoint>,
    },
    Rolling {
        rolling_avg: f64,
        rolling_std: f64,
        latest: u64,
        window_months: u32,
        monthly_series: Vec<MonthlyPoint>,
    },
    Cusum {
        mean: f64,
        std: f64,
        control_limit: f64,
        cusum_series: Vec<CusumPoint>,
    },
    Change {
        current_period: u64,
        comparison_period: u64,
    },
    Contingency {
        a: u64,
        b: u64,
        c: u64,
        d: u64,
    },
    Expected {
        observed: u64,
        expected: f64,
        rr: f64,
    },
}

/// Outcome of one method for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResult {
    pub method: SignalMethod,
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_ci: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_ci: Option<f64>,
    pub is_signal: bool,
    pub signal_strength: SignalStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<MethodDetails>,
}

/// Per-entity detection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub entity: String,
    pub entity_level: DrillLevel,
    pub total_events: u64,
    pub deaths: u64,
    pub injuries: u64,
    pub malfunctions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_events: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_period_events: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
    pub method_results: Vec<MethodResult>,
    pub signal_type: SignalStrength,
    pub has_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_level: Option<DrillLevel>,
}

/// Entity counters over the full analysed set (before truncation).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalCounts {
    pub high: usize,
    pub elevated: usize,
    pub normal: usize,
    pub total_entities_analyzed: usize,
}

/// Detection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub level: DrillLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_value: Option<String>,
    pub methods_applied: Vec<SignalMethod>,
    pub time_info: TimeInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_completeness: Option<DataCompleteness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_note: Option<String>,
    pub counts: SignalCounts,
    pub signals: Vec<SignalResult>,
}
