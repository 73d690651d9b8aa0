//! Effect - A single side effect the plan will perform

use crate::resource::{Resource, ResourceId, State};

/// A side effect, described as a value until the plan is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource that does not exist yet
    Create(Resource),
    /// Destroy the existing resource and create it again with new attributes
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete a resource that is no longer declared
    Delete(State),
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Replace { id, .. } => id,
            Effect::Delete(s) => &s.id,
        }
    }
}
