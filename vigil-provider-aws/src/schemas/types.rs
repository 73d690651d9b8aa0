//! AWS-specific type definitions

use std::sync::LazyLock;

use regex::Regex;
use vigil_core::resource::Value;
use vigil_core::schema::AttributeType;

/// Valid AWS regions
const VALID_REGIONS: &[&str] = &[
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "ca-central-1",
    "sa-east-1",
];

/// Condition types AWS Backup accepts in a selection's tag list
pub const CONDITION_TYPES: &[&str] = &["STRINGEQUALS"];

/// Partition, service, optional region, optional account id, then the resource part
static ARN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[\w-]+:[a-zA-Z0-9-]+:([a-z]{2}-(gov-)?[a-z]+-\d)?:(\d*):(.+)$")
        .expect("ARN pattern is valid")
});

static SELECTION_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_.]+$").expect("selection name pattern is valid"));

/// AWS region type with custom validation
pub fn aws_region() -> AttributeType {
    AttributeType::Custom {
        name: "Region".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if VALID_REGIONS.contains(&s.as_str()) => Ok(()),
            Value::String(s) => Err(format!(
                "Invalid region '{}', expected one of: {}",
                s,
                VALID_REGIONS.join(", ")
            )),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Amazon Resource Name
pub fn arn() -> AttributeType {
    AttributeType::Custom {
        name: "Arn".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => validate_arn(s),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Check that a string looks like an ARN
pub fn validate_arn(s: &str) -> Result<(), String> {
    if ARN_PATTERN.is_match(s) {
        Ok(())
    } else {
        Err(format!("'{}' doesn't look like a valid ARN", s))
    }
}

/// Backup selection name: 1 to 50 alphanumeric, hyphen, underscore or period characters
pub fn selection_name() -> AttributeType {
    AttributeType::Custom {
        name: "SelectionName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if s.is_empty() || s.chars().count() > 50 => Err(format!(
                "name must be between 1 and 50 characters, got {}",
                s.chars().count()
            )),
            Value::String(s) if !SELECTION_NAME_PATTERN.is_match(s) => Err(format!(
                "name '{}' must contain only alphanumeric, hyphen, underscore, and period characters",
                s
            )),
            Value::String(_) => Ok(()),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Tag condition match operator
pub fn condition_type() -> AttributeType {
    AttributeType::Enum(CONDITION_TYPES.iter().map(|s| s.to_string()).collect())
}
