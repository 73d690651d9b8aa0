//! Backup selection resource
//!
//! A backup selection assigns resources to an AWS Backup plan, either by
//! explicit ARN (`resources`) or by tag conditions (`tag`). The service has
//! no update call for selections, so the resource only knows create, read
//! and delete; every attribute forces replacement.
//!
//! `tag` is a set. Members are keyed by [`condition_tag_hash`], which makes
//! the local state independent of the order conditions were declared or
//! returned in, and collapses duplicate conditions into one member.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use thiserror::Error;
use vigil_core::provider::{ProviderError, ResourceType};
use vigil_core::resource::{Resource, ResourceId, State, Value};
use vigil_core::schema::{ResourceSchema, TypeError};

use crate::backup_client::{BackupApi, BackupApiError, Condition, SelectionDescriptor};
use crate::hashcode;
use crate::schemas::backup::selection_schema;

/// Resource type name used in configuration and state
pub const RESOURCE_TYPE: &str = "backup_selection";

/// Backup Selection resource type
pub struct BackupSelectionType;

impl ResourceType for BackupSelectionType {
    fn name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        selection_schema()
    }
}

/// Errors from backup selection operations
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid backup selection: {}", format_type_errors(.0))]
    Validation(Vec<TypeError>),

    #[error("attribute '{0}' is missing or not a string")]
    MissingAttribute(&'static str),

    #[error("tag at index {index}: {message}")]
    InvalidTag { index: usize, message: String },

    #[error("backup selection has no selection id")]
    MissingIdentifier,

    #[error("error creating Backup Selection: {0}")]
    Create(#[source] BackupApiError),

    #[error("resources item at index {0} is not a string")]
    InvalidResource(usize),

    #[error("Backup Selection ({0}) was not found right after creation")]
    VanishedAfterCreate(String),

    /// The selection exists remotely; `created` carries its identity
    #[error("error reading Backup Selection ({selection_id}) after creation: {source}")]
    ReadAfterCreate {
        selection_id: String,
        created: Box<State>,
        #[source]
        source: BackupApiError,
    },

    #[error("error reading Backup Selection: {0}")]
    Read(#[source] BackupApiError),

    #[error("error deleting Backup Selection: {0}")]
    Delete(#[source] BackupApiError),
}

fn format_type_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SelectionError {
    /// Convert into the provider error reported for a resource
    ///
    /// A selection created but not read back is attached as partial state.
    pub fn into_provider_error(self, id: ResourceId) -> ProviderError {
        let message = self.to_string();
        let err = ProviderError::new(message).for_resource(id);
        match self {
            SelectionError::Create(cause)
            | SelectionError::Read(cause)
            | SelectionError::Delete(cause) => err.with_cause(cause),
            SelectionError::ReadAfterCreate {
                created, source, ..
            } => err.with_partial_state(*created).with_cause(source),
            _ => err,
        }
    }
}

/// Hash of one tag condition map
///
/// Each of `type`, `key` and `value` that is present contributes its
/// string followed by `-`; the buffer is hashed with [`hashcode::string`].
pub fn condition_tag_hash(tag: &HashMap<String, Value>) -> i32 {
    let mut buf = String::new();
    for field in ["type", "key", "value"] {
        if let Some(Value::String(s)) = tag.get(field) {
            buf.push_str(s);
            buf.push('-');
        }
    }
    hashcode::string(&buf)
}

impl Condition {
    /// Local map form: `{type, key, value}`
    pub fn to_map(&self) -> HashMap<String, Value> {
        HashMap::from([
            (
                "type".to_string(),
                Value::String(self.condition_type.clone()),
            ),
            ("key".to_string(), Value::String(self.key.clone())),
            ("value".to_string(), Value::String(self.value.clone())),
        ])
    }

    pub fn hash_code(&self) -> i32 {
        condition_tag_hash(&self.to_map())
    }
}

/// Set of tag conditions keyed by their hash
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    members: BTreeMap<i32, Condition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; returns false when a member with the same hash exists
    pub fn insert(&mut self, condition: Condition) -> bool {
        let code = condition.hash_code();
        if self.members.contains_key(&code) {
            return false;
        }
        self.members.insert(code, condition);
        true
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.members.values()
    }

    /// State form: a list of condition maps in hash order
    pub fn to_value(&self) -> Value {
        Value::List(self.iter().map(|c| Value::Map(c.to_map())).collect())
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut set = ConditionSet::new();
        for condition in iter {
            set.insert(condition);
        }
        set
    }
}

/// Expand configured tag maps into wire conditions, keeping input order
pub fn expand_condition_tags(tags: &[Value]) -> Result<Vec<Condition>, SelectionError> {
    tags.iter()
        .enumerate()
        .map(|(index, tag)| {
            let Value::Map(map) = tag else {
                return Err(SelectionError::InvalidTag {
                    index,
                    message: "expected a map".to_string(),
                });
            };
            let field = |name: &str| match map.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                _ => Err(SelectionError::InvalidTag {
                    index,
                    message: format!("'{}' is missing or not a string", name),
                }),
            };
            Ok(Condition::new(field("type")?, field("key")?, field("value")?))
        })
        .collect()
}

/// Resolved configuration of one selection
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionConfig {
    pub plan_id: String,
    pub selection: SelectionDescriptor,
}

impl SelectionConfig {
    /// Build the create request from declared attributes
    ///
    /// Omitted `tag` and `resources` are sent as empty lists. `tag` is a
    /// set, so duplicate conditions are sent once, in hash order.
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, SelectionError> {
        let string = |name: &'static str| match attributes.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(SelectionError::MissingAttribute(name)),
        };

        let conditions = match attributes.get("tag") {
            Some(Value::List(tags)) => expand_condition_tags(tags)?
                .into_iter()
                .collect::<ConditionSet>()
                .iter()
                .cloned()
                .collect(),
            _ => Vec::new(),
        };

        let resources = match attributes.get("resources") {
            Some(Value::List(items)) => items
                .iter()
                .enumerate()
                .map(|(index, v)| {
                    v.as_str()
                        .map(String::from)
                        .ok_or(SelectionError::InvalidResource(index))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            plan_id: string("plan_id")?,
            selection: SelectionDescriptor {
                name: string("name")?,
                iam_role_arn: string("iam_role_arn")?,
                conditions: Some(conditions),
                resources: Some(resources),
            },
        })
    }
}

/// Create a selection and return its state as the service reports it
pub async fn create(api: &dyn BackupApi, resource: &Resource) -> Result<State, SelectionError> {
    selection_schema()
        .validate(&resource.attributes)
        .map_err(SelectionError::Validation)?;

    let config = SelectionConfig::from_attributes(&resource.attributes)?;

    debug!(
        "Creating Backup Selection {} in plan {}",
        config.selection.name, config.plan_id
    );
    let selection_id = api
        .create_selection(&config.plan_id, &config.selection)
        .await
        .map_err(SelectionError::Create)?;
    info!(
        "Created Backup Selection {} ({})",
        resource.id, selection_id
    );

    // The identity is known from here on, whatever the read reports
    let created = State::existing(resource.id.clone(), resource.attributes.clone())
        .with_identifier(&selection_id);

    let state = match read(api, &created).await {
        Ok(state) => state,
        Err(SelectionError::Read(source)) => {
            return Err(SelectionError::ReadAfterCreate {
                selection_id,
                created: Box::new(created),
                source,
            });
        }
        Err(e) => return Err(e),
    };
    if !state.exists {
        return Err(SelectionError::VanishedAfterCreate(selection_id));
    }
    Ok(state)
}

/// Refresh a selection from the service
///
/// A selection the service no longer knows reads as not found (identity
/// cleared) rather than as an error.
pub async fn read(api: &dyn BackupApi, prior: &State) -> Result<State, SelectionError> {
    let Some(selection_id) = prior.identifier.as_deref() else {
        return Ok(State::not_found(prior.id.clone()));
    };
    let plan_id = prior
        .get_str("plan_id")
        .ok_or(SelectionError::MissingAttribute("plan_id"))?;

    let details = match api.get_selection(plan_id, selection_id).await {
        Ok(details) => details,
        Err(BackupApiError::NotFound(_)) => {
            warn!(
                "Backup Selection ({}) not found, removing from state",
                selection_id
            );
            return Ok(State::not_found(prior.id.clone()));
        }
        Err(e) => return Err(SelectionError::Read(e)),
    };

    let mut attributes = HashMap::new();
    attributes.insert("plan_id".to_string(), Value::String(details.plan_id));
    attributes.insert(
        "name".to_string(),
        Value::String(details.selection.name),
    );
    attributes.insert(
        "iam_role_arn".to_string(),
        Value::String(details.selection.iam_role_arn),
    );

    if let Some(conditions) = details.selection.conditions {
        let tags: ConditionSet = conditions.into_iter().collect();
        attributes.insert("tag".to_string(), tags.to_value());
    }
    if let Some(resources) = details.selection.resources {
        attributes.insert(
            "resources".to_string(),
            Value::List(resources.into_iter().map(Value::String).collect()),
        );
    }

    Ok(State::existing(prior.id.clone(), attributes).with_identifier(selection_id))
}

/// Delete a selection
///
/// Not found is an error here: the service is asked to remove exactly the
/// selection recorded in state.
pub async fn delete(api: &dyn BackupApi, state: &State) -> Result<(), SelectionError> {
    let selection_id = state
        .identifier
        .as_deref()
        .ok_or(SelectionError::MissingIdentifier)?;
    let plan_id = state
        .get_str("plan_id")
        .ok_or(SelectionError::MissingAttribute("plan_id"))?;

    debug!(
        "Deleting Backup Selection {} from plan {}",
        selection_id, plan_id
    );
    api.delete_selection(plan_id, selection_id)
        .await
        .map_err(SelectionError::Delete)?;
    info!("Deleted Backup Selection {} ({})", state.id, selection_id);

    Ok(())
}
