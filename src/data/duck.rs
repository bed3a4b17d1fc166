//! DuckDB adapter: translates structured predicates into SQL over the
//! ingestion schema (`master_events`, `devices`, `mdr_text`).

use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use duckdb::Connection;
use parking_lot::Mutex;
use tracing::info;

use crate::data::filter::{Condition, DateField, DeviceColumn, MasterColumn, Predicate};
use crate::data::store::{
    CodePopulationRow, DateWindow, EntityCodeRow, EntityMonthRow, EntityQuery, EntityTotalRow,
    EventStore, OutcomeCounts, PopulationCounts, StoreError,
};
use crate::signals::types::{DrillLevel, MonthKey};

/// Columnar event store backed by DuckDB.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open the analytical database read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path.as_ref(), config)?;
        info!(path = %path.as_ref().display(), "opened duckdb event store");
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn level_column(level: DrillLevel) -> &'static str {
    match level {
        DrillLevel::Manufacturer => "m.manufacturer_clean",
        DrillLevel::Brand => "d.brand_name",
        DrillLevel::Generic => "d.generic_name",
        DrillLevel::Model => "d.model_number",
    }
}

fn master_column(column: MasterColumn) -> &'static str {
    match column {
        MasterColumn::ManufacturerClean => "m.manufacturer_clean",
        MasterColumn::ProductCode => "m.product_code",
    }
}

fn device_column(column: DeviceColumn) -> &'static str {
    match column {
        DeviceColumn::BrandName => "d.brand_name",
        DeviceColumn::GenericName => "d.generic_name",
        DeviceColumn::ManufacturerDClean => "d.manufacturer_d_clean",
        DeviceColumn::ModelNumber => "d.model_number",
        DeviceColumn::DeviceReportProductCode => "d.device_report_product_code",
        DeviceColumn::ImplantFlag => "d.implant_flag",
    }
}

fn date_column(field: DateField) -> &'static str {
    match field {
        DateField::DateReceived => "m.date_received",
        DateField::DateOfEvent => "m.date_of_event",
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Rendered WHERE clause plus bound parameters.
struct Rendered {
    conditions: Vec<String>,
    params: Vec<String>,
    joins_devices: bool,
}

impl Rendered {
    fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }
}

/// Render a predicate. When `join_devices` is true the devices relation is
/// part of the FROM clause and device conditions filter joined rows;
/// otherwise they are folded into one EXISTS subquery so a single device row
/// must satisfy all of them.
fn render(predicate: &Predicate, window: Option<DateWindow>, join_devices: bool) -> Rendered {
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    let mut device_fragments: Vec<String> = Vec::new();
    let mut device_params: Vec<String> = Vec::new();

    if let Some(window) = window {
        conditions.push("m.date_received >= CAST(? AS DATE)".to_string());
        params.push(window.start.to_string());
        conditions.push("m.date_received <= CAST(? AS DATE)".to_string());
        params.push(window.end.to_string());
    }

    for condition in &predicate.conditions {
        match condition {
            Condition::DateBetween { field, from, to } => {
                let column = date_column(*field);
                if let Some(from) = from {
                    conditions.push(format!("{column} >= CAST(? AS DATE)"));
                    params.push(from.to_string());
                }
                if let Some(to) = to {
                    conditions.push(format!("{column} <= CAST(? AS DATE)"));
                    params.push(to.to_string());
                }
            }
            Condition::EventTypeIn(codes) => {
                conditions.push(format!("m.event_type IN ({})", placeholders(codes.len())));
                params.extend(codes.iter().cloned());
            }
            Condition::MasterIn { column, values } => {
                conditions.push(format!(
                    "{} IN ({})",
                    master_column(*column),
                    placeholders(values.len())
                ));
                params.extend(values.iter().cloned());
            }
            Condition::NarrativeContains(needle) => {
                conditions.push(
                    "EXISTS (SELECT 1 FROM mdr_text t \
                     WHERE t.mdr_report_key = m.mdr_report_key \
                     AND LOWER(t.text_content) LIKE ?)"
                        .to_string(),
                );
                params.push(format!("%{needle}%"));
            }
            Condition::EntityIn { level: DrillLevel::Manufacturer, values } => {
                conditions.push(format!(
                    "m.manufacturer_clean IN ({})",
                    placeholders(values.len())
                ));
                params.extend(values.iter().cloned());
            }
            Condition::DeviceIn { column, values } => {
                device_fragments.push(format!(
                    "{} IN ({})",
                    device_column(*column),
                    placeholders(values.len())
                ));
                device_params.extend(values.iter().cloned());
            }
            Condition::EntityIn { level, values } => {
                device_fragments.push(format!(
                    "{} IN ({})",
                    level_column(*level),
                    placeholders(values.len())
                ));
                device_params.extend(values.iter().cloned());
            }
        }
    }

    if join_devices {
        conditions.extend(device_fragments);
        params.extend(device_params);
    } else if !device_fragments.is_empty() {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM devices d \
             WHERE d.mdr_report_key = m.mdr_report_key AND {})",
            device_fragments.join(" AND ")
        ));
        params.extend(device_params);
    }

    Rendered {
        conditions,
        params,
        joins_devices: join_devices,
    }
}

/// CASE expression applying group rewrites to the level column. Display
/// names and members are inlined with quote escaping; the rest of the query
/// stays parameterised.
fn entity_expression(query: &EntityQuery) -> String {
    let column = level_column(query.expr.level);
    if query.expr.rewrites.is_empty() {
        return column.to_string();
    }
    let mut sql = String::from("CASE");
    for rewrite in &query.expr.rewrites {
        let members = rewrite
            .members
            .iter()
            .map(|m| format!("'{}'", escape(m)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " WHEN {column} IN ({members}) THEN '{}'",
            escape(&rewrite.display_name)
        ));
    }
    sql.push_str(&format!(" ELSE {column} END"));
    sql
}

fn from_clause(rendered: &Rendered) -> &'static str {
    if rendered.joins_devices {
        "FROM master_events m JOIN devices d ON d.mdr_report_key = m.mdr_report_key"
    } else {
        "FROM master_events m"
    }
}

fn store_err<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError(err.to_string())
}

impl EventStore for DuckStore {
    fn entity_month_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityMonthRow>, StoreError> {
        let join = query.expr.level != DrillLevel::Manufacturer;
        let rendered = render(query.predicate, Some(query.window), join);
        let entity = entity_expression(query);
        let column = level_column(query.expr.level);
        let sql = format!(
            "SELECT {entity} AS entity,
                    EXTRACT(YEAR FROM m.date_received)::INT AS y,
                    EXTRACT(MONTH FROM m.date_received)::INT AS mo,
                    COUNT(DISTINCT m.mdr_report_key),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'D' THEN m.mdr_report_key END),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'IN' THEN m.mdr_report_key END),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'M' THEN m.mdr_report_key END)
             {} WHERE {} AND {column} IS NOT NULL
             GROUP BY 1, 2, 3 ORDER BY 1, 2, 3",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(rendered.params.iter()), |row| {
                Ok(EntityMonthRow {
                    entity: row.get::<_, String>(0)?,
                    month: MonthKey {
                        year: row.get::<_, i32>(1)?,
                        month: row.get::<_, i32>(2)? as u32,
                    },
                    counts: OutcomeCounts {
                        total: row.get::<_, i64>(3)? as u64,
                        deaths: row.get::<_, i64>(4)? as u64,
                        injuries: row.get::<_, i64>(5)? as u64,
                        malfunctions: row.get::<_, i64>(6)? as u64,
                    },
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn entity_period_totals(&self, query: &EntityQuery) -> Result<Vec<EntityTotalRow>, StoreError> {
        let join = query.expr.level != DrillLevel::Manufacturer;
        let rendered = render(query.predicate, Some(query.window), join);
        let entity = entity_expression(query);
        let column = level_column(query.expr.level);
        let sql = format!(
            "SELECT {entity} AS entity, COUNT(DISTINCT m.mdr_report_key)
             {} WHERE {} AND {column} IS NOT NULL GROUP BY 1",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(rendered.params.iter()), |row| {
                Ok(EntityTotalRow {
                    entity: row.get::<_, String>(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<PopulationCounts, StoreError> {
        let rendered = render(predicate, Some(window), false);
        let sql = format!(
            "SELECT COUNT(DISTINCT m.mdr_report_key),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'D' THEN m.mdr_report_key END)
             {} WHERE {}",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        conn.query_row(
            &sql,
            duckdb::params_from_iter(rendered.params.iter()),
            |row| {
                Ok(PopulationCounts {
                    total: row.get::<_, i64>(0)? as u64,
                    deaths: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .map_err(store_err)
    }

    fn entity_code_outcomes(&self, query: &EntityQuery) -> Result<Vec<EntityCodeRow>, StoreError> {
        let join = query.expr.level != DrillLevel::Manufacturer;
        let rendered = render(query.predicate, Some(query.window), join);
        let entity = entity_expression(query);
        let column = level_column(query.expr.level);
        let sql = format!(
            "SELECT {entity} AS entity, m.product_code,
                    COUNT(DISTINCT m.mdr_report_key),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'D' THEN m.mdr_report_key END)
             {} WHERE {} AND {column} IS NOT NULL AND m.product_code IS NOT NULL
             GROUP BY 1, 2",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(rendered.params.iter()), |row| {
                Ok(EntityCodeRow {
                    entity: row.get::<_, String>(0)?,
                    product_code: row.get::<_, String>(1)?,
                    total: row.get::<_, i64>(2)? as u64,
                    deaths: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn code_population_outcomes(
        &self,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<Vec<CodePopulationRow>, StoreError> {
        let rendered = render(predicate, Some(window), false);
        let sql = format!(
            "SELECT m.product_code,
                    COUNT(DISTINCT m.mdr_report_key),
                    COUNT(DISTINCT CASE WHEN m.event_type = 'D' THEN m.mdr_report_key END)
             {} WHERE {} AND m.product_code IS NOT NULL GROUP BY 1",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(rendered.params.iter()), |row| {
                Ok(CodePopulationRow {
                    product_code: row.get::<_, String>(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                    deaths: row.get::<_, i64>(2)? as u64,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn exists_at_level(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        window: DateWindow,
    ) -> Result<bool, StoreError> {
        let join = level != DrillLevel::Manufacturer;
        let rendered = render(predicate, Some(window), join);
        let column = level_column(level);
        let sql = format!(
            "SELECT 1 {} WHERE {} AND {column} IS NOT NULL LIMIT 1",
            from_clause(&rendered),
            rendered.where_sql(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut rows = stmt
            .query(duckdb::params_from_iter(rendered.params.iter()))
            .map_err(store_err)?;
        Ok(rows.next().map_err(store_err)?.is_some())
    }

    fn entity_event_counts(
        &self,
        level: DrillLevel,
        predicate: &Predicate,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let join = level != DrillLevel::Manufacturer;
        let mut rendered = render(predicate, None, join);
        let column = level_column(level);
        if let Some(search) = search {
            rendered.conditions.push(format!("LOWER({column}) LIKE ?"));
            rendered.params.push(format!("%{}%", search.to_lowercase()));
        }
        let sql = format!(
            "SELECT {column}, COUNT(DISTINCT m.mdr_report_key) AS events
             {} WHERE {} AND {column} IS NOT NULL
             GROUP BY 1 ORDER BY events DESC, 1 LIMIT {}",
            from_clause(&rendered),
            rendered.where_sql(),
            limit.min(10_000),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(rendered.params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn latest_received(&self) -> Result<Option<NaiveDate>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT CAST(MAX(date_received) AS VARCHAR) FROM master_events",
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}
