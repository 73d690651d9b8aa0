//! State lock records
//!
//! A run holds the lock for as long as it may write state, which serializes
//! provider calls against the same resources across processes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Locks older than this (15 minutes) are treated as abandoned
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// Who holds the state and for what
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock ("apply", "destroy")
    pub operation: String,
    /// `user@host`
    pub who: String,
    /// Process id of the holder
    #[serde(default)]
    pub pid: u32,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            pid: std::process::id(),
            created,
            expires: created + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }
}

fn lock_owner() -> String {
    let user = ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_string());

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lock_is_live_for_the_default_timeout() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(lock.who.contains('@'));
        assert_eq!(lock.pid, std::process::id());
        assert_eq!(
            (lock.expires - lock.created).num_seconds(),
            DEFAULT_LOCK_TIMEOUT_SECS
        );
        assert!(!lock.is_expired());
    }

    #[test]
    fn negative_timeout_is_already_expired() {
        let lock = LockInfo::with_timeout("destroy", -1);
        assert!(lock.is_expired());
    }

    #[test]
    fn lock_serialization() {
        let lock = LockInfo::new("apply");
        let json = serde_json::to_string(&lock).unwrap();
        let back: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lock);
    }
}
