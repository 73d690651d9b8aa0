//! AWS Backup API seam
//!
//! The backup selection resource talks to AWS Backup through the
//! [`BackupApi`] trait. [`SdkBackupClient`] implements it over
//! `aws-sdk-backup`; tests substitute an in-memory implementation.

use async_trait::async_trait;
use aws_sdk_backup::Client as BackupClient;
use aws_sdk_backup::error::DisplayErrorContext;
use aws_sdk_backup::types::{BackupSelection, Condition as SdkCondition, ConditionType};
use thiserror::Error;

/// A single tag condition as sent over the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub condition_type: String,
    pub key: String,
    pub value: String,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Selection body shared by create requests and get responses
///
/// `conditions` and `resources` keep the distinction between an absent
/// list and an empty one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionDescriptor {
    pub name: String,
    pub iam_role_arn: String,
    pub conditions: Option<Vec<Condition>>,
    pub resources: Option<Vec<String>>,
}

/// Response of a get call
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionDetails {
    pub plan_id: String,
    pub selection: SelectionDescriptor,
}

/// Errors returned by the backup service
#[derive(Debug, Error)]
pub enum BackupApiError {
    /// The plan or selection does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The request could not be built from the given input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The service response lacks a field the operation depends on
    #[error("service response is missing {0}")]
    MalformedResponse(&'static str),

    /// Any other service or transport failure
    #[error("{0}")]
    Service(String),
}

/// Remote operations on backup selections
#[async_trait]
pub trait BackupApi: Send + Sync {
    /// Create a selection under a plan, returning the new selection id
    async fn create_selection(
        &self,
        plan_id: &str,
        selection: &SelectionDescriptor,
    ) -> Result<String, BackupApiError>;

    /// Fetch a selection by plan id and selection id
    async fn get_selection(
        &self,
        plan_id: &str,
        selection_id: &str,
    ) -> Result<SelectionDetails, BackupApiError>;

    /// Remove a selection
    async fn delete_selection(&self, plan_id: &str, selection_id: &str)
    -> Result<(), BackupApiError>;
}

/// [`BackupApi`] over the AWS SDK
pub struct SdkBackupClient {
    client: BackupClient,
}

impl SdkBackupClient {
    pub fn new(client: BackupClient) -> Self {
        Self { client }
    }

    /// Build a client from already loaded AWS configuration
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(BackupClient::new(config))
    }
}

fn to_sdk_selection(selection: &SelectionDescriptor) -> Result<BackupSelection, BackupApiError> {
    let conditions = selection
        .conditions
        .as_ref()
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| {
                    SdkCondition::builder()
                        .condition_type(ConditionType::from(c.condition_type.as_str()))
                        .condition_key(&c.key)
                        .condition_value(&c.value)
                        .build()
                        .map_err(|e| BackupApiError::InvalidRequest(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    BackupSelection::builder()
        .selection_name(&selection.name)
        .iam_role_arn(&selection.iam_role_arn)
        .set_list_of_tags(conditions)
        .set_resources(selection.resources.clone())
        .build()
        .map_err(|e| BackupApiError::InvalidRequest(e.to_string()))
}

fn from_sdk_selection(selection: &BackupSelection) -> SelectionDescriptor {
    SelectionDescriptor {
        name: selection.selection_name().to_string(),
        iam_role_arn: selection.iam_role_arn().to_string(),
        conditions: selection.list_of_tags.as_ref().map(|tags| {
            tags.iter()
                .map(|c| {
                    Condition::new(
                        c.condition_type().as_str(),
                        c.condition_key(),
                        c.condition_value(),
                    )
                })
                .collect()
        }),
        resources: selection.resources.clone(),
    }
}

#[async_trait]
impl BackupApi for SdkBackupClient {
    async fn create_selection(
        &self,
        plan_id: &str,
        selection: &SelectionDescriptor,
    ) -> Result<String, BackupApiError> {
        let output = self
            .client
            .create_backup_selection()
            .backup_plan_id(plan_id)
            .backup_selection(to_sdk_selection(selection)?)
            .send()
            .await
            .map_err(|e| BackupApiError::Service(DisplayErrorContext(&e).to_string()))?;

        output
            .selection_id()
            .map(String::from)
            .ok_or(BackupApiError::MalformedResponse("selection id"))
    }

    async fn get_selection(
        &self,
        plan_id: &str,
        selection_id: &str,
    ) -> Result<SelectionDetails, BackupApiError> {
        let output = self
            .client
            .get_backup_selection()
            .backup_plan_id(plan_id)
            .selection_id(selection_id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception())
                {
                    BackupApiError::NotFound(format!(
                        "backup selection {} in plan {}",
                        selection_id, plan_id
                    ))
                } else {
                    BackupApiError::Service(DisplayErrorContext(&e).to_string())
                }
            })?;

        let selection = output
            .backup_selection()
            .ok_or(BackupApiError::MalformedResponse("backup selection"))?;

        Ok(SelectionDetails {
            plan_id: output.backup_plan_id().unwrap_or(plan_id).to_string(),
            selection: from_sdk_selection(selection),
        })
    }

    async fn delete_selection(
        &self,
        plan_id: &str,
        selection_id: &str,
    ) -> Result<(), BackupApiError> {
        self.client
            .delete_backup_selection()
            .backup_plan_id(plan_id)
            .selection_id(selection_id)
            .send()
            .await
            .map_err(|e| BackupApiError::Service(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
