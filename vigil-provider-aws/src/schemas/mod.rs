//! AWS resource schema definitions

pub mod backup;
pub mod types;

use vigil_core::schema::ResourceSchema;

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(backup::schemas());
    schemas
}
