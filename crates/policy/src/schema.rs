//! Minimal input schema checks
//!
//! Supports `{"required": [..], "properties": {"name": {"type": ".."}}}` with
//! the types `string`, `number`, `boolean`, `object` and `array`. Unknown types
//! accept anything.

use crate::error::{PolicyError, PolicyResult};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    pub required: Vec<String>,
    /// (field, expected type)
    pub properties: Vec<(String, String)>,
}

impl InputSchema {
    pub fn parse(value: &Value) -> PolicyResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| PolicyError::invalid("schema must be an object"))?;

        let required = match map.get("required") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            Some(_) => return Err(PolicyError::invalid("schema.required must be an array")),
        };

        let properties = match map.get("properties") {
            None => Vec::new(),
            Some(Value::Object(props)) => props
                .iter()
                .filter_map(|(name, spec)| {
                    let expected = spec.get("type")?.as_str()?;
                    (!expected.is_empty()).then(|| (name.clone(), expected.to_string()))
                })
                .collect(),
            Some(_) => return Err(PolicyError::invalid("schema.properties must be an object")),
        };

        Ok(Self {
            required,
            properties,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.properties.is_empty()
    }

    /// Validation messages, empty when the input conforms
    pub fn validate(&self, input: &Value) -> Vec<String> {
        let Some(fields) = input.as_object() else {
            return vec!["input is not valid JSON object".to_string()];
        };

        let mut errors = Vec::new();

        for name in &self.required {
            if !fields.contains_key(name) {
                errors.push(format!("missing required field '{}'", name));
            }
        }

        for (name, expected) in &self.properties {
            if let Some(value) = fields.get(name) {
                if !type_matches(value, expected) {
                    errors.push(format!("field '{}' expected type {}", name, expected));
                }
            }
        }

        errors
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> InputSchema {
        InputSchema::parse(&json!({
            "required": ["action", "agent"],
            "properties": {
                "action": { "type": "string" },
                "amount": { "type": "number" },
                "meta": { "type": "custom" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_input() {
        let errors = schema().validate(&json!({ "action": "read", "agent": {}, "amount": 3 }));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_missing_and_mistyped() {
        let errors = schema().validate(&json!({ "action": 5, "amount": "x", "meta": null }));
        assert_eq!(
            errors,
            vec![
                "missing required field 'agent'".to_string(),
                "field 'action' expected type string".to_string(),
                "field 'amount' expected type number".to_string(),
            ]
        );
    }

    #[test]
    fn test_non_object_input() {
        assert_eq!(
            schema().validate(&json!([1, 2])),
            vec!["input is not valid JSON object".to_string()]
        );
    }

    #[test]
    fn test_bad_schema() {
        assert!(InputSchema::parse(&json!({ "required": "action" })).is_err());
        assert!(InputSchema::parse(&json!([])).is_err());
        assert!(InputSchema::parse(&json!({})).unwrap().is_empty());
    }
}
