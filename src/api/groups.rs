//! Handlers for entity-group management.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::types::{AvailableEntitiesResponse, AvailableEntity, SuggestNameResponse};
use crate::api::AppState;
use crate::data::filter::{self, FilterSpec};
use crate::error::{SignalError, SignalResult};
use crate::groups::registry::{CreateGroup, GroupFilter, UpdateGroup};
use crate::groups::{naming, EntityGroup, EntityType};
use crate::signals::types::DrillLevel;

type ApiResult<T> = Result<Json<T>, SignalError>;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub entity_type: Option<EntityType>,
    #[serde(default = "default_true")]
    pub include_built_in: bool,
    #[serde(default)]
    pub active_only: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub groups: Vec<EntityGroup>,
    pub total: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<GroupListResponse> {
    let groups = state.registry.list(GroupFilter {
        entity_type: query.entity_type,
        include_built_in: query.include_built_in,
        active_only: query.active_only,
    });
    let total = groups.len();
    Ok(Json(GroupListResponse { groups, total }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<EntityGroup> {
    Ok(Json(state.registry.get(&id)?))
}

#[instrument(skip(state, request))]
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateGroup>,
) -> Result<(StatusCode, Json<EntityGroup>), SignalError> {
    let counts = member_event_counts(&state, request.entity_type, &request.members)?;
    let group = state.registry.create(request, &counts)?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateGroup>,
) -> ApiResult<EntityGroup> {
    let counts = match (&request.members, state.registry.get(&id)?) {
        (Some(members), group) => member_event_counts(&state, group.entity_type, members)?,
        (None, _) => HashMap::new(),
    };
    Ok(Json(state.registry.update(&id, request, &counts)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, SignalError> {
    state.registry.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<EntityGroup> {
    Ok(Json(state.registry.set_active(&id, true)?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<EntityGroup> {
    Ok(Json(state.registry.set_active(&id, false)?))
}

#[derive(Debug, Deserialize)]
pub struct SuggestNameQuery {
    /// Comma-separated member names.
    pub members: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
}

pub async fn suggest_name(
    State(state): State<AppState>,
    Query(query): Query<SuggestNameQuery>,
) -> ApiResult<SuggestNameResponse> {
    let raw: Vec<String> = query
        .members
        .split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let members = naming::normalize_members(&raw)?;
    let entity_type = query.entity_type.unwrap_or(EntityType::Manufacturer);
    let counts = member_event_counts(&state, entity_type, &members)?;

    Ok(Json(SuggestNameResponse {
        suggested_name: naming::derive_display_name(&members, &counts),
        member_count: members.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AvailableEntitiesQuery {
    pub entity_type: EntityType,
    pub product_codes: Option<String>,
    pub event_types: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Distinct raw entities with event counts and their current active-group
/// assignment, for the group-builder UI.
pub async fn available_entities(
    State(state): State<AppState>,
    Query(query): Query<AvailableEntitiesQuery>,
) -> ApiResult<AvailableEntitiesResponse> {
    let spec = FilterSpec {
        product_codes: split_csv(&query.product_codes),
        event_types: split_csv(&query.event_types),
        ..FilterSpec::default()
    };
    let level = entity_type_level(query.entity_type);
    let plan = filter::build(level, &spec, None, &[])?;

    let rows = state
        .store
        .entity_event_counts(
            level,
            &plan.predicate,
            query.search.as_deref(),
            query.limit.min(500),
        )
        .map_err(|e| SignalError::StoreUnavailable(e.to_string()))?;

    let assignments = state.registry.active_assignments(query.entity_type);
    let entities: Vec<AvailableEntity> = rows
        .into_iter()
        .map(|(name, event_count)| {
            let assigned = assignments.get(&name.to_lowercase());
            AvailableEntity {
                assigned_group_id: assigned.map(|(id, _)| id.clone()),
                assigned_group_name: assigned.map(|(_, name)| name.clone()),
                name,
                event_count,
            }
        })
        .collect();
    let total = entities.len();

    Ok(Json(AvailableEntitiesResponse { entities, total }))
}

/// Event counts for prospective members, feeding display-name derivation.
fn member_event_counts(
    state: &AppState,
    entity_type: EntityType,
    members: &[String],
) -> SignalResult<HashMap<String, u64>> {
    let level = entity_type_level(entity_type);
    let plan = filter::build(level, &FilterSpec::default(), None, &[])?;
    let rows = state
        .store
        .entity_event_counts(level, &plan.predicate, None, usize::MAX)
        .map_err(|e| SignalError::StoreUnavailable(e.to_string()))?;
    let wanted: Vec<String> = members.iter().map(|m| m.to_lowercase()).collect();
    Ok(rows
        .into_iter()
        .filter(|(name, _)| wanted.iter().any(|w| w == &name.to_lowercase()))
        .collect())
}

fn entity_type_level(entity_type: EntityType) -> DrillLevel {
    match entity_type {
        EntityType::Manufacturer => DrillLevel::Manufacturer,
        EntityType::Brand => DrillLevel::Brand,
        EntityType::GenericName => DrillLevel::Generic,
    }
}

fn split_csv(raw: &Option<String>) -> Option<Vec<String>> {
    let raw = raw.as_deref()?;
    let values: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}
