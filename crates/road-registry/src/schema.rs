use std::sync::Arc;

use apache_avro::Schema;

use crate::error::SchemaError;
use crate::registry::RoadRegistry;

/// Resolves `(road, schema version)` against the registry's current snapshot.
///
/// Stateless: every lookup reads whatever snapshot the registry publishes at
/// that moment. Refreshing snapshots is the registry's business.
#[derive(Clone)]
pub struct SchemaProvider {
    registry: Arc<dyn RoadRegistry>,
}

impl SchemaProvider {
    pub fn new(registry: Arc<dyn RoadRegistry>) -> Self {
        Self { registry }
    }

    pub fn schema(&self, road: &str, version: i32) -> Result<Arc<Schema>, SchemaError> {
        let snapshot = self.registry.snapshot();
        let road_model = snapshot
            .get(road)
            .ok_or_else(|| SchemaError::UnknownRoad(road.to_string()))?;

        road_model
            .schema(version)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownSchemaVersion {
                road: road.to_string(),
                version,
            })
    }
}
