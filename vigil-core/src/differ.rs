//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the resources declared in configuration with the states the
//! Provider reports, and generates the Effects needed to converge (Plan).
//! Providers have no update operation, so any drift becomes a replacement.

use std::collections::HashMap;

use log::debug;

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs replacement
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
    /// Resource exists but not in desired state -> needs deletion
    Delete(State),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
///
/// With a schema, set-typed attributes compare without regard to order or
/// duplicates, and attributes the schema knows but the configuration omits
/// are compared too (an omitted collection equals an empty one).
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut keys: Vec<&String> = desired.keys().collect();
    if let Some(schema) = schema {
        keys.extend(
            current
                .keys()
                .filter(|k| schema.attributes.contains_key(*k) && !desired.contains_key(*k)),
        );
    }
    keys.sort();

    keys.into_iter()
        .filter(|key| {
            let is_set = schema
                .and_then(|s| s.attributes.get(*key))
                .is_some_and(|a| a.attr_type.is_set());
            !values_equal(desired.get(*key), current.get(*key), is_set)
        })
        .cloned()
        .collect()
}

fn values_equal(desired: Option<&Value>, current: Option<&Value>, is_set: bool) -> bool {
    match (desired, current) {
        (Some(Value::List(a)), Some(Value::List(b))) if is_set => {
            a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v))
        }
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        (Some(v), None) | (None, Some(v)) => is_empty_collection(v),
    }
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    }
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Existing states with no matching declaration are scheduled for deletion,
/// after all creates and replacements, in resource id order.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let schema = schemas.get(&resource.id.resource_type);

        match diff(resource, &current, schema) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => {
                debug!("{} must be replaced: {}", id, changed_attributes.join(", "));
                plan.add(Effect::Replace {
                    id,
                    from,
                    to,
                    changed_attributes,
                })
            }
            Diff::NoChange(_) => {}
            Diff::Delete(state) => plan.add(Effect::Delete(state)),
        }
    }

    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !desired.iter().any(|r| r.id == s.id))
        .collect();
    orphans.sort_by(|a, b| a.id.cmp(&b.id));

    for state in orphans {
        debug!("{} is no longer declared", state.id);
        plan.add(Effect::Delete(state.clone()));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn tag(key: &str, value: &str) -> Value {
        Value::Map(HashMap::from([
            ("type".to_string(), Value::String("STRINGEQUALS".to_string())),
            ("key".to_string(), Value::String(key.to_string())),
            ("value".to_string(), Value::String(value.to_string())),
        ]))
    }

    fn selection_schema() -> ResourceSchema {
        ResourceSchema::new("backup_selection")
            .attribute(AttributeSchema::new("name", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("tag", AttributeType::Set(Box::new(AttributeType::String)))
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "resources",
                    AttributeType::List(Box::new(AttributeType::String)),
                )
                .force_new(),
            )
    }

    fn existing(attrs: Vec<(&str, Value)>) -> State {
        State::existing(
            ResourceId::new("backup_selection", "daily"),
            attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
        .with_identifier("sel-1")
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("backup_selection", "daily");
        let current = State::not_found(ResourceId::new("backup_selection", "daily"));

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_when_same() {
        let desired = Resource::new("backup_selection", "daily")
            .with_attribute("name", Value::String("daily-db".to_string()));
        let current = existing(vec![("name", Value::String("daily-db".to_string()))]);

        let result = diff(&desired, &current, None);
        assert!(!result.is_change());
    }

    #[test]
    fn diff_replace_when_different() {
        let desired = Resource::new("backup_selection", "daily")
            .with_attribute("name", Value::String("weekly-db".to_string()));
        let current = existing(vec![("name", Value::String("daily-db".to_string()))]);

        match diff(&desired, &current, Some(&selection_schema())) {
            Diff::Replace {
                changed_attributes,
                from,
                ..
            } => {
                assert_eq!(changed_attributes, vec!["name".to_string()]);
                assert_eq!(from.identifier.as_deref(), Some("sel-1"));
            }
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn set_attributes_ignore_order_and_duplicates() {
        let desired = Resource::new("backup_selection", "daily").with_attribute(
            "tag",
            Value::List(vec![tag("env", "prod"), tag("team", "db"), tag("env", "prod")]),
        );
        let current = existing(vec![(
            "tag",
            Value::List(vec![tag("team", "db"), tag("env", "prod")]),
        )]);

        let result = diff(&desired, &current, Some(&selection_schema()));
        assert_eq!(result, Diff::NoChange(desired.id.clone()));
    }

    #[test]
    fn list_attributes_are_ordered() {
        let desired = Resource::new("backup_selection", "daily").with_attribute(
            "resources",
            Value::List(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string()),
            ]),
        );
        let current = existing(vec![(
            "resources",
            Value::List(vec![
                Value::String("b".to_string()),
                Value::String("a".to_string()),
            ]),
        )]);

        assert!(diff(&desired, &current, Some(&selection_schema())).is_change());
    }

    #[test]
    fn omitted_collection_equals_empty() {
        let desired = Resource::new("backup_selection", "daily");
        let current = existing(vec![("tag", Value::List(vec![]))]);
        assert!(!diff(&desired, &current, Some(&selection_schema())).is_change());

        let current = existing(vec![("tag", Value::List(vec![tag("env", "prod")]))]);
        match diff(&desired, &current, Some(&selection_schema())) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["tag".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn create_plan_from_resources() {
        let resources = vec![
            Resource::new("backup_selection", "new"),
            Resource::new("backup_selection", "daily")
                .with_attribute("name", Value::String("weekly-db".to_string())),
        ];

        let mut current_states = HashMap::new();
        current_states.insert(
            ResourceId::new("backup_selection", "daily"),
            existing(vec![("name", Value::String("daily-db".to_string()))]),
        );
        let orphan_id = ResourceId::new("backup_selection", "orphan");
        current_states.insert(
            orphan_id.clone(),
            State::existing(orphan_id.clone(), HashMap::new()).with_identifier("sel-9"),
        );

        let schemas = HashMap::from([("backup_selection".to_string(), selection_schema())]);
        let plan = create_plan(&resources, &current_states, &schemas);

        assert_eq!(plan.effects().len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Replace { .. }));
        assert!(matches!(&plan.effects()[2], Effect::Delete(s) if s.id == orphan_id));
    }
}
