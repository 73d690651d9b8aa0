//! In-memory backup service for tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backup_client::{BackupApi, BackupApiError, SelectionDescriptor, SelectionDetails};

/// A call received by [`FakeBackupApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create(String),
    Get(String, String),
    Delete(String, String),
}

/// Stores selections in memory and records every call
///
/// Selection ids are handed out as `sel-abc123`, `sel-abc124`, ...
/// Conditions are stored exactly as submitted, duplicates included.
#[derive(Default)]
pub struct FakeBackupApi {
    selections: Mutex<HashMap<(String, String), SelectionDescriptor>>,
    calls: Mutex<Vec<ApiCall>>,
    next_failure: Mutex<Option<BackupApiError>>,
    next_get_failure: Mutex<Option<BackupApiError>>,
    created: Mutex<u32>,
}

impl FakeBackupApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make the next call fail with `err`
    pub fn fail_next(&self, err: BackupApiError) {
        *self.next_failure.lock().unwrap() = Some(err);
    }

    /// Make the next get call fail with `err`, leaving other calls alone
    pub fn fail_next_get(&self, err: BackupApiError) {
        *self.next_get_failure.lock().unwrap() = Some(err);
    }

    pub fn insert(&self, plan_id: &str, selection_id: &str, selection: SelectionDescriptor) {
        self.selections
            .lock()
            .unwrap()
            .insert((plan_id.to_string(), selection_id.to_string()), selection);
    }

    pub fn stored(&self, plan_id: &str, selection_id: &str) -> Option<SelectionDescriptor> {
        self.selections
            .lock()
            .unwrap()
            .get(&(plan_id.to_string(), selection_id.to_string()))
            .cloned()
    }

    fn record(&self, call: ApiCall) -> Result<(), BackupApiError> {
        self.calls.lock().unwrap().push(call);
        match self.next_failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackupApi for FakeBackupApi {
    async fn create_selection(
        &self,
        plan_id: &str,
        selection: &SelectionDescriptor,
    ) -> Result<String, BackupApiError> {
        self.record(ApiCall::Create(plan_id.to_string()))?;

        let mut created = self.created.lock().unwrap();
        let selection_id = format!("sel-abc{}", 123 + *created);
        *created += 1;

        self.insert(plan_id, &selection_id, selection.clone());
        Ok(selection_id)
    }

    async fn get_selection(
        &self,
        plan_id: &str,
        selection_id: &str,
    ) -> Result<SelectionDetails, BackupApiError> {
        self.record(ApiCall::Get(plan_id.to_string(), selection_id.to_string()))?;
        if let Some(err) = self.next_get_failure.lock().unwrap().take() {
            return Err(err);
        }

        self.stored(plan_id, selection_id)
            .map(|selection| SelectionDetails {
                plan_id: plan_id.to_string(),
                selection,
            })
            .ok_or_else(|| BackupApiError::NotFound(selection_id.to_string()))
    }

    async fn delete_selection(
        &self,
        plan_id: &str,
        selection_id: &str,
    ) -> Result<(), BackupApiError> {
        self.record(ApiCall::Delete(
            plan_id.to_string(),
            selection_id.to_string(),
        ))?;

        self.selections
            .lock()
            .unwrap()
            .remove(&(plan_id.to_string(), selection_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackupApiError::NotFound(selection_id.to_string()))
    }
}
