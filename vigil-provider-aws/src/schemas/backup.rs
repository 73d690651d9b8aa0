//! AWS Backup schema definitions

use vigil_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types;

/// Returns the schema for backup selections
///
/// Every attribute forces replacement: AWS Backup has no call to modify a
/// selection in place.
pub fn selection_schema() -> ResourceSchema {
    ResourceSchema::new(crate::backup_selection::RESOURCE_TYPE)
        .with_description("Assigns resources to an AWS Backup plan")
        .attribute(
            AttributeSchema::new("name", types::selection_name())
                .required()
                .force_new()
                .with_description("Display name of the selection"),
        )
        .attribute(
            AttributeSchema::new("plan_id", AttributeType::String)
                .required()
                .force_new()
                .with_description("ID of the backup plan the selection belongs to"),
        )
        .attribute(
            AttributeSchema::new("iam_role_arn", types::arn())
                .required()
                .force_new()
                .with_description("IAM role AWS Backup assumes to back up the selected resources"),
        )
        .attribute(
            AttributeSchema::new("tag", AttributeType::Set(Box::new(condition_tag())))
                .force_new()
                .with_description("Select resources whose tag matches every condition field"),
        )
        .attribute(
            AttributeSchema::new(
                "resources",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .force_new()
            .with_description("ARNs or patterns of resources to back up"),
        )
}

fn condition_tag() -> AttributeType {
    AttributeType::Struct {
        name: "ConditionTag".to_string(),
        fields: vec![
            AttributeSchema::new("type", types::condition_type()).required(),
            AttributeSchema::new("key", AttributeType::String).required(),
            AttributeSchema::new("value", AttributeType::String).required(),
        ],
    }
}

/// Returns all backup-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![selection_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vigil_core::resource::Value;
    use vigil_core::schema::TypeError;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    fn tag(kind: &str, key: &str, value: &str) -> Value {
        Value::Map(HashMap::from([
            ("type".to_string(), s(kind)),
            ("key".to_string(), s(key)),
            ("value".to_string(), s(value)),
        ]))
    }

    fn valid_attrs() -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), s("daily-db")),
            ("plan_id".to_string(), s("plan-1")),
            (
                "iam_role_arn".to_string(),
                s("arn:aws:iam::123456789012:role/backup"),
            ),
            (
                "tag".to_string(),
                Value::List(vec![tag("STRINGEQUALS", "env", "prod")]),
            ),
            (
                "resources".to_string(),
                Value::List(vec![s("arn:aws:dynamodb:us-east-1:123456789012:table/orders")]),
            ),
        ])
    }

    #[test]
    fn valid_selection() {
        assert!(selection_schema().validate(&valid_attrs()).is_ok());
    }

    #[test]
    fn tag_and_resources_are_optional() {
        let mut attrs = valid_attrs();
        attrs.remove("tag");
        attrs.remove("resources");
        assert!(selection_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn every_attribute_forces_replacement() {
        let schema = selection_schema();
        assert_eq!(schema.attributes.len(), 5);
        assert!(schema.is_immutable());
        assert!(schema.attributes["tag"].attr_type.is_set());
        assert!(!schema.attributes["resources"].attr_type.is_set());
    }

    #[test]
    fn missing_required_attributes() {
        let errors = selection_schema().validate(&HashMap::new()).unwrap_err();
        let missing: Vec<String> = errors
            .iter()
            .filter_map(|e| match e {
                TypeError::MissingRequired { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(missing, vec!["iam_role_arn", "name", "plan_id"]);
    }

    #[test]
    fn invalid_name() {
        let mut attrs = valid_attrs();
        attrs.insert("name".to_string(), s("daily db"));
        assert!(selection_schema().validate(&attrs).is_err());
    }

    #[test]
    fn invalid_role_arn() {
        let mut attrs = valid_attrs();
        attrs.insert("iam_role_arn".to_string(), s("backup-role"));
        let errors = selection_schema().validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("iam_role_arn"));
    }

    #[test]
    fn disallowed_condition_type() {
        let mut attrs = valid_attrs();
        attrs.insert(
            "tag".to_string(),
            Value::List(vec![tag("STRINGLIKE", "env", "prod")]),
        );
        let errors = selection_schema().validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("STRINGLIKE"));
    }
}
