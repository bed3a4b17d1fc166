//! Entity-alias groups: registry, invariants, and display-name derivation.

pub mod naming;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use self::registry::{EntityGroup, GroupRegistry};

/// Kind of raw name an alias group collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Manufacturer,
    Brand,
    GenericName,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Manufacturer => "manufacturer",
            EntityType::Brand => "brand",
            EntityType::GenericName => "generic_name",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manufacturer" => Some(EntityType::Manufacturer),
            "brand" => Some(EntityType::Brand),
            "generic_name" => Some(EntityType::GenericName),
            _ => None,
        }
    }
}
