//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use vigil_core::resource::Value;

use crate::lock::LockInfo;
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Another run holds the state
    #[error(
        "State is locked by {who} since {created} (lock ID: {lock_id}, operation: {operation})"
    )]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
        created: String,
    },

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The stored state cannot be parsed
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
            created: lock.created.to_rfc3339(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Storage for the state file and its lock
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Returns `None` before the first write
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Persist `state`; callers bump the serial first
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Fails with [`BackendError::Locked`] while another unexpired lock exists
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    /// Release a lock obtained from [`StateBackend::acquire_lock`]
    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Remove the lock with `lock_id` regardless of its holder
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Where the state lives, for messages
    fn location(&self) -> String;
}

/// Configuration for a state backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Backend type (only "local" is built in)
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    /// A local backend storing state at `path`
    pub fn local(path: impl Into<String>) -> Self {
        Self::new("local").with_attribute("path", Value::String(path.into()))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new("local")
    }
}
