//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Build the backend named by `config.backend_type`
pub fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => Ok(Box::new(LocalBackend::from_config(config)?)),
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend() {
        let result = create_backend(&BackendConfig::new("s3"));

        match result {
            Err(BackendError::UnsupportedBackend(name)) => assert_eq!(name, "s3"),
            Err(other) => panic!("Expected UnsupportedBackend error, got {other}"),
            Ok(_) => panic!("Expected UnsupportedBackend error"),
        }
    }

    #[test]
    fn test_local_backend() {
        let backend = create_backend(&BackendConfig::local("prod.state.json")).unwrap();
        assert!(backend.location().ends_with("prod.state.json"));
    }
}
