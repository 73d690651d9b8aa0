//! Vigil AWS Provider
//!
//! AWS Provider implementation. Resources:
//!
//! - `backup_selection` - assigns resources to an AWS Backup plan

pub mod backup_client;
pub mod backup_selection;
pub mod hashcode;
pub mod schemas;

#[cfg(test)]
mod testing;

use aws_config::Region;
use vigil_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use vigil_core::resource::{Resource, ResourceId, State};

use crate::backup_client::{BackupApi, SdkBackupClient};
use crate::backup_selection::{BackupSelectionType, RESOURCE_TYPE as BACKUP_SELECTION};

/// Region used when the configuration names none
pub const DEFAULT_REGION: &str = "us-east-1";

/// AWS Provider
pub struct AwsProvider {
    backup: Box<dyn BackupApi>,
    region: String,
}

impl AwsProvider {
    /// Create a new AWS Provider
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            backup: Box::new(SdkBackupClient::from_conf(&config)),
            region: region.to_string(),
        }
    }

    /// Create with a specific backup client (for testing)
    pub fn with_backup_client(backup: Box<dyn BackupApi>, region: impl Into<String>) -> Self {
        Self {
            backup,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

fn unknown_resource_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
        .for_resource(id.clone())
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![Box::new(BackupSelectionType)]
    }

    fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>> {
        let prior = prior.clone();
        Box::pin(async move {
            match prior.id.resource_type.as_str() {
                BACKUP_SELECTION => backup_selection::read(self.backup.as_ref(), &prior)
                    .await
                    .map_err(|e| e.into_provider_error(prior.id.clone())),
                _ => Err(unknown_resource_type(&prior.id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                BACKUP_SELECTION => backup_selection::create(self.backup.as_ref(), &resource)
                    .await
                    .map_err(|e| e.into_provider_error(resource.id.clone())),
                _ => Err(unknown_resource_type(&resource.id)),
            }
        })
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        Box::pin(async move {
            match state.id.resource_type.as_str() {
                BACKUP_SELECTION => backup_selection::delete(self.backup.as_ref(), &state)
                    .await
                    .map_err(|e| e.into_provider_error(state.id.clone())),
                _ => Err(unknown_resource_type(&state.id)),
            }
        })
    }
}
