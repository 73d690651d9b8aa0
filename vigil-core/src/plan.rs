//! Plan - Collection of Effects
//!
//! A Plan is an ordered list of Effects to be executed.
//! No side effects occur until the Plan is applied.

use crate::effect::Effect;

/// Plan containing Effects to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    effects: Vec<Effect>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for effect in &self.effects {
            match effect {
                Effect::Create(_) => summary.create += 1,
                Effect::Replace { .. } => summary.replace += 1,
                Effect::Delete(_) => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub replace: usize,
    pub delete: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to replace, {} to delete",
            self.create, self.replace, self.delete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceId, State};

    #[test]
    fn summary_counts_each_effect_kind() {
        let mut plan = Plan::new();
        assert!(plan.is_empty());

        plan.add(Effect::Create(Resource::new("backup_selection", "a")));
        plan.add(Effect::Create(Resource::new("backup_selection", "b")));
        plan.add(Effect::Delete(State::not_found(ResourceId::new(
            "backup_selection",
            "c",
        ))));

        let summary = plan.summary();
        assert_eq!(
            summary,
            PlanSummary {
                create: 2,
                replace: 0,
                delete: 1
            }
        );
        assert_eq!(
            summary.to_string(),
            "Plan: 2 to create, 0 to replace, 1 to delete"
        );
        assert_eq!(plan.effects()[2].resource_id().name, "c");
    }
}
