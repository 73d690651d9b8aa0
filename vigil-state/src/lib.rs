//! Vigil State Management
//!
//! Persists what the provider reported for every managed resource, so that
//! later runs can refresh, diff and delete them by their remote identifier.
//!
//! - **StateFile**: all managed resources, with a serial and lineage
//! - **StateBackend**: storage trait (read/write state, locking)
//! - **LocalBackend**: JSON file next to a `.lock` file
//!
//! # Example
//!
//! ```ignore
//! use vigil_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("vigil.state.json"))?;
//!
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply effects, upserting ResourceState entries ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
