//! Configuration file loading
//!
//! A `vigil.toml` names the provider region, the state backend and the
//! resources to manage, keyed by type and then by name:
//!
//! ```toml
//! [provider]
//! region = "ap-northeast-1"
//!
//! [resources.backup_selection.daily_db]
//! name = "daily-db"
//! plan_id = "plan-1"
//! iam_role_arn = "arn:aws:iam::123456789012:role/backup"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use vigil_core::resource::{Resource, Value};
use vigil_provider_aws::DEFAULT_REGION;
use vigil_provider_aws::schemas::{all_schemas, types};
use vigil_state::BackendConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid provider region: {0}")]
    InvalidRegion(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A TOML value with no counterpart in the resource model
    #[error("{path}: {kind} values are not supported")]
    UnsupportedValue { path: String, kind: &'static str },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    provider: ProviderSection,
    backend: Option<BackendSection>,
    #[serde(default)]
    resources: BTreeMap<String, BTreeMap<String, toml::Table>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderSection {
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendSection {
    #[serde(rename = "type", default = "default_backend_type")]
    backend_type: String,
    #[serde(flatten)]
    attributes: toml::Table,
}

fn default_backend_type() -> String {
    "local".to_string()
}

/// A loaded configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub region: String,
    pub backend: BackendConfig,
    /// Declared resources, ordered by type and then name
    pub resources: Vec<Resource>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &default_region())
    }

    /// Parse configuration text; `fallback_region` applies when
    /// `[provider] region` is absent
    pub fn parse(content: &str, fallback_region: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;

        let region = raw
            .provider
            .region
            .unwrap_or_else(|| fallback_region.to_string());
        types::aws_region()
            .validate(&Value::String(region.clone()))
            .map_err(|e| ConfigError::InvalidRegion(e.to_string()))?;

        let backend = match raw.backend {
            Some(section) => {
                let mut config = BackendConfig::new(section.backend_type);
                for (key, value) in section.attributes {
                    let value = to_value(&value, &format!("backend.{}", key))?;
                    config = config.with_attribute(key, value);
                }
                config
            }
            None => BackendConfig::default(),
        };

        let known: Vec<String> = all_schemas().into_iter().map(|s| s.resource_type).collect();
        let mut resources = Vec::new();
        for (resource_type, instances) in raw.resources {
            if !known.contains(&resource_type) {
                return Err(ConfigError::UnknownResourceType(resource_type));
            }
            for (name, table) in instances {
                let mut resource = Resource::new(&resource_type, &name);
                for (key, value) in &table {
                    let path = format!("resources.{}.{}.{}", resource_type, name, key);
                    resource = resource.with_attribute(key, to_value(value, &path)?);
                }
                resources.push(resource);
            }
        }

        Ok(Self {
            region,
            backend,
            resources,
        })
    }
}

/// `AWS_REGION` when set, otherwise the provider default
pub fn default_region() -> String {
    std::env::var("AWS_REGION")
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

fn to_value(value: &toml::Value, path: &str) -> Result<Value, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(Value::String(s.clone())),
        toml::Value::Integer(n) => Ok(Value::Int(*n)),
        toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
        toml::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| to_value(item, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        toml::Value::Table(table) => table
            .iter()
            .map(|(k, v)| Ok((k.clone(), to_value(v, &format!("{}.{}", path, k))?)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map(Value::Map),
        toml::Value::Float(_) => Err(ConfigError::UnsupportedValue {
            path: path.to_string(),
            kind: "float",
        }),
        toml::Value::Datetime(_) => Err(ConfigError::UnsupportedValue {
            path: path.to_string(),
            kind: "datetime",
        }),
    }
}
