//! Road model and registry file format.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use apache_avro::Schema;
use serde::Deserialize;

use crate::error::{RegistryError, Result};

/// A named, schema-versioned event stream.
#[derive(Debug, Clone)]
pub struct Road {
    pub name: String,
    pub enabled: bool,
    pub deleted: bool,
    pub schemas: BTreeMap<i32, Arc<Schema>>,
}

impl Road {
    /// Whether subscribers may consume the road.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn schema(&self, version: i32) -> Option<&Arc<Schema>> {
        self.schemas.get(&version)
    }

    /// Highest registered schema version.
    pub fn latest_version(&self) -> Option<i32> {
        self.schemas.keys().next_back().copied()
    }
}

/// Immutable view of every road at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RoadSnapshot {
    roads: HashMap<String, Arc<Road>>,
}

impl RoadSnapshot {
    pub fn new(roads: impl IntoIterator<Item = Road>) -> Self {
        Self {
            roads: roads
                .into_iter()
                .map(|road| (road.name.clone(), Arc::new(road)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Road>> {
        self.roads.get(name)
    }

    pub fn len(&self) -> usize {
        self.roads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roads.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roads.keys().map(String::as_str)
    }

    /// Parse a registry YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: RegistryFile = serde_yaml::from_str(content)?;

        let mut roads = HashMap::new();
        for definition in file.roads {
            let road = definition.into_road()?;
            if roads.contains_key(&road.name) {
                return Err(RegistryError::DuplicateRoad(road.name));
            }
            roads.insert(road.name.clone(), Arc::new(road));
        }

        Ok(Self { roads })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    roads: Vec<RoadDefinition>,
}

#[derive(Debug, Deserialize)]
struct RoadDefinition {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    deleted: bool,
    /// Avro schema per version, either as a JSON string or inline YAML.
    #[serde(default)]
    schemas: BTreeMap<i32, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl RoadDefinition {
    fn into_road(self) -> Result<Road> {
        let mut schemas = BTreeMap::new();
        for (version, definition) in self.schemas {
            let parsed = match &definition {
                serde_json::Value::String(text) => Schema::parse_str(text),
                other => Schema::parse(other),
            }
            .map_err(|e| RegistryError::InvalidSchema {
                road: self.name.clone(),
                version,
                message: e.to_string(),
            })?;
            schemas.insert(version, Arc::new(parsed));
        }

        Ok(Road {
            name: self.name,
            enabled: self.enabled,
            deleted: self.deleted,
            schemas,
        })
    }
}
