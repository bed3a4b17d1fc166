//! Persistent registry of entity-alias groups.
//!
//! Groups live in a small SQLite database; an in-memory snapshot is rebuilt
//! after every write so readers never touch the connection. Reads clone an
//! `Arc`, writes serialise behind the connection mutex.

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{SignalError, SignalResult};
use crate::groups::{naming, EntityType};

/// A stored alias group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityGroup {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub members: Vec<String>,
    pub display_name: String,
    pub is_active: bool,
    pub is_built_in: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl EntityGroup {
    fn contains_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.eq_ignore_ascii_case(name))
    }
}

/// Fields accepted when creating a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub members: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Fields accepted when updating a group; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroup {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<String>>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// List filters mirroring the HTTP query parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupFilter {
    pub entity_type: Option<EntityType>,
    pub include_built_in: bool,
    pub active_only: bool,
}

/// Groups seeded on first open. Built-ins start inactive and are immutable.
const BUILT_IN_GROUPS: &[(&str, &str, &str, &str, &[&str])] = &[
    (
        "abbott-group",
        "Abbott (with St. Jude)",
        "Abbott including acquired St. Jude Medical",
        "Abbott Group",
        &["ABBOTT", "ABBOTT LABORATORIES", "ST. JUDE MEDICAL"],
    ),
    (
        "medtronic-group",
        "Medtronic (All Divisions)",
        "Medtronic including all divisions and subsidiaries",
        "Medtronic Group",
        &["MEDTRONIC", "MEDTRONIC, INC.", "MEDTRONIC SPINE"],
    ),
];

/// Process-wide registry of entity groups.
pub struct GroupRegistry {
    conn: Mutex<Connection>,
    snapshot: RwLock<Arc<Vec<EntityGroup>>>,
}

impl GroupRegistry {
    /// Open (or create) the registry database at `path` and seed built-ins.
    pub fn open<P: AsRef<Path>>(path: P) -> SignalResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(internal)?;
        let registry = Self::bootstrap(conn)?;
        info!(path = %path.as_ref().display(), "opened entity-group registry");
        Ok(registry)
    }

    /// In-memory registry, used by tests and the one-shot CLI.
    pub fn open_in_memory() -> SignalResult<Self> {
        let conn = Connection::open_in_memory().map_err(internal)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> SignalResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entity_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                entity_type TEXT NOT NULL,
                members TEXT NOT NULL,
                display_name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_built_in INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .map_err(internal)?;

        let now = timestamp();
        for (id, name, description, display_name, members) in BUILT_IN_GROUPS {
            let members_json = serde_json::to_string(members).map_err(internal)?;
            conn.execute(
                "INSERT OR IGNORE INTO entity_groups
                 (id, name, description, entity_type, members, display_name,
                  is_active, is_built_in, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'manufacturer', ?4, ?5, 0, 1, ?6, ?6)",
                rusqlite::params![id, name, description, members_json, display_name, now],
            )
            .map_err(internal)?;
        }

        let registry = Self {
            conn: Mutex::new(conn),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Current immutable view of all groups, in insertion order.
    pub fn snapshot(&self) -> Arc<Vec<EntityGroup>> {
        self.snapshot.read().clone()
    }

    /// List groups matching `filter`.
    pub fn list(&self, filter: GroupFilter) -> Vec<EntityGroup> {
        self.snapshot()
            .iter()
            .filter(|g| filter.include_built_in || !g.is_built_in)
            .filter(|g| !filter.active_only || g.is_active)
            .filter(|g| filter.entity_type.map_or(true, |t| g.entity_type == t))
            .cloned()
            .collect()
    }

    /// Fetch one group by id.
    pub fn get(&self, id: &str) -> SignalResult<EntityGroup> {
        self.snapshot()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| SignalError::GroupNotFound(id.to_string()))
    }

    /// Active groups for one entity type, in insertion order.
    pub fn active_groups(&self, entity_type: EntityType) -> Vec<EntityGroup> {
        self.snapshot()
            .iter()
            .filter(|g| g.is_active && g.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Resolve a display name back to its active group, for drill-down.
    pub fn find_active_by_display_name(
        &self,
        entity_type: EntityType,
        display_name: &str,
    ) -> Option<EntityGroup> {
        self.active_groups(entity_type)
            .into_iter()
            .find(|g| g.display_name == display_name)
    }

    /// Create a group. New groups start active, so the membership-uniqueness
    /// invariant is checked before the row is written.
    pub fn create(
        &self,
        request: CreateGroup,
        event_counts: &HashMap<String, u64>,
    ) -> SignalResult<EntityGroup> {
        if request.name.trim().is_empty() {
            return Err(SignalError::BadRequest("group name must not be empty".into()));
        }
        let members = naming::normalize_members(&request.members)?;
        self.check_membership_conflict(request.entity_type, &members, None)?;

        let display_name = match request.display_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => naming::derive_display_name(&members, event_counts),
        };

        let now = timestamp();
        let group = EntityGroup {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            description: request.description,
            entity_type: request.entity_type,
            members,
            display_name,
            is_active: true,
            is_built_in: false,
            created_at: now.clone(),
            updated_at: now,
        };
        self.persist(&group)?;
        self.reload()?;
        Ok(group)
    }

    /// Update a user-defined group. Built-ins reject every mutation here.
    pub fn update(
        &self,
        id: &str,
        request: UpdateGroup,
        event_counts: &HashMap<String, u64>,
    ) -> SignalResult<EntityGroup> {
        let mut group = self.get(id)?;
        if group.is_built_in {
            return Err(SignalError::GroupConflict(
                "built-in groups cannot be modified".into(),
            ));
        }

        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(SignalError::BadRequest("group name must not be empty".into()));
            }
            group.name = name.trim().to_string();
        }
        if let Some(description) = request.description {
            group.description = Some(description);
        }
        if let Some(members) = request.members {
            group.members = naming::normalize_members(&members)?;
            if request.display_name.is_none() {
                group.display_name =
                    naming::derive_display_name(&group.members, event_counts);
            }
        }
        if let Some(display_name) = request.display_name {
            if !display_name.trim().is_empty() {
                group.display_name = display_name.trim().to_string();
            }
        }
        if let Some(active) = request.is_active {
            group.is_active = active;
        }

        if group.is_active {
            self.check_membership_conflict(group.entity_type, &group.members, Some(id))?;
        }

        group.updated_at = timestamp();
        self.persist(&group)?;
        self.reload()?;
        Ok(group)
    }

    /// Delete a user-defined group.
    pub fn delete(&self, id: &str) -> SignalResult<()> {
        let group = self.get(id)?;
        if group.is_built_in {
            return Err(SignalError::GroupConflict(
                "built-in groups cannot be deleted".into(),
            ));
        }
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entity_groups WHERE id = ?1", [id])
            .map_err(internal)?;
        drop(conn);
        self.reload()
    }

    /// Atomic activate/deactivate. Activation re-checks the one-active-group
    /// invariant under the write lock.
    pub fn set_active(&self, id: &str, active: bool) -> SignalResult<EntityGroup> {
        let conn = self.conn.lock();
        let mut group = self
            .snapshot()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| SignalError::GroupNotFound(id.to_string()))?;

        if active {
            self.check_membership_conflict(group.entity_type, &group.members, Some(id))?;
        }

        group.is_active = active;
        group.updated_at = timestamp();
        conn.execute(
            "UPDATE entity_groups SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![group.is_active as i64, group.updated_at, id],
        )
        .map_err(internal)?;
        drop(conn);
        self.reload()?;
        Ok(group)
    }

    /// Map of active member name (case-folded) to group assignment, used by
    /// the available-entities enumeration.
    pub fn active_assignments(&self, entity_type: EntityType) -> HashMap<String, (String, String)> {
        let mut map = HashMap::new();
        for group in self.active_groups(entity_type) {
            for member in &group.members {
                map.insert(
                    member.to_lowercase(),
                    (group.id.clone(), group.name.clone()),
                );
            }
        }
        map
    }

    fn check_membership_conflict(
        &self,
        entity_type: EntityType,
        members: &[String],
        exclude_id: Option<&str>,
    ) -> SignalResult<()> {
        for group in self.active_groups(entity_type) {
            if exclude_id == Some(group.id.as_str()) {
                continue;
            }
            if let Some(member) = members.iter().find(|m| group.contains_member(m)) {
                return Err(SignalError::GroupConflict(format!(
                    "'{member}' already belongs to active {} group '{}'",
                    entity_type.as_str(),
                    group.name
                )));
            }
        }
        Ok(())
    }

    fn persist(&self, group: &EntityGroup) -> SignalResult<()> {
        let members_json = serde_json::to_string(&group.members).map_err(internal)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entity_groups
             (id, name, description, entity_type, members, display_name,
              is_active, is_built_in, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                members = excluded.members,
                display_name = excluded.display_name,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            rusqlite::params![
                group.id,
                group.name,
                group.description,
                group.entity_type.as_str(),
                members_json,
                group.display_name,
                group.is_active as i64,
                group.is_built_in as i64,
                group.created_at,
                group.updated_at,
            ],
        )
        .map_err(internal)?;
        Ok(())
    }

    fn reload(&self) -> SignalResult<()> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, entity_type, members, display_name,
                        is_active, is_built_in, created_at, updated_at
                 FROM entity_groups ORDER BY created_at, id",
            )
            .map_err(internal)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .map_err(internal)?;

        let mut groups = Vec::new();
        for row in rows {
            let (id, name, description, entity_type, members, display_name, is_active, is_built_in, created_at, updated_at) =
                row.map_err(internal)?;
            let Some(entity_type) = EntityType::parse(&entity_type) else {
                warn!(%id, %entity_type, "skipping group with unknown entity type");
                continue;
            };
            let members: Vec<String> = serde_json::from_str(&members).map_err(internal)?;
            groups.push(EntityGroup {
                id,
                name,
                description,
                entity_type,
                members,
                display_name,
                is_active: is_active != 0,
                is_built_in: is_built_in != 0,
                created_at,
                updated_at,
            });
        }
        drop(stmt);
        drop(conn);
        *self.snapshot.write() = Arc::new(groups);
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn internal<E: std::fmt::Display>(err: E) -> SignalError {
    SignalError::Internal(err.to_string())
}
