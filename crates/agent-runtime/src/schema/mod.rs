//! JSON Schema validation with a compiled-validator cache (spec.md §4.2).
//!
//! The compile cache is process-wide and keyed by schema identity (its
//! canonical bytes' SHA-256), which is safe because compiled validators
//! are immutable once built — the one global cache exempted from "no
//! singletons" in SPEC_FULL.md's ambient-stack notes.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::types::SchemaError;

const MAX_SCHEMA_BYTES: usize = 100 * 1024;
const MAX_SCHEMA_DEPTH: usize = 20;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub struct SchemaValidator {
    cache: DashMap<String, Arc<jsonschema::Validator>>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Validates `instance` against `schema`. Never fails for invalid
    /// *data* — that comes back as `{valid: false, errors}`. Only an
    /// invalid or oversized *schema* is an `Err`.
    pub fn validate(
        &self,
        schema: &serde_json::Value,
        instance: &serde_json::Value,
    ) -> Result<ValidationOutcome, SchemaError> {
        let key = schema_identity(schema)?;
        let validator = match self.cache.get(&key) {
            Some(v) => v.clone(),
            None => {
                let compiled = jsonschema::validator_for(schema)
                    .map_err(|e| SchemaError::Invalid(e.to_string()))?;
                let arc = Arc::new(compiled);
                self.cache.insert(key, arc.clone());
                arc
            }
        };

        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        Ok(ValidationOutcome {
            valid: errors.is_empty(),
            errors,
        })
    }
}

fn schema_identity(schema: &serde_json::Value) -> Result<String, SchemaError> {
    let bytes = serde_json::to_vec(schema).map_err(|e| SchemaError::Invalid(e.to_string()))?;
    if bytes.len() > MAX_SCHEMA_BYTES {
        return Err(SchemaError::TooLarge(MAX_SCHEMA_BYTES));
    }
    let depth = value_depth(schema);
    if depth > MAX_SCHEMA_DEPTH {
        return Err(SchemaError::TooDeep(MAX_SCHEMA_DEPTH));
    }
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn value_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => {
            1 + map.values().map(value_depth).max().unwrap_or(0)
        }
        serde_json::Value::Array(items) => {
            1 + items.iter().map(value_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_instance_has_no_errors() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let outcome = validator
            .validate(&schema, &serde_json::json!({"name": "a"}))
            .unwrap();
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn invalid_instance_returns_errors_not_err() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let outcome = validator.validate(&schema, &serde_json::json!({})).unwrap();
        assert!(!outcome.valid);
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn invalid_schema_is_an_error() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({"type": "not-a-real-type"});
        let result = validator.validate(&schema, &serde_json::json!(1));
        assert!(result.is_err());
    }

    #[test]
    fn oversized_schema_is_rejected_before_compiling() {
        let validator = SchemaValidator::new();
        let mut props = serde_json::Map::new();
        for i in 0..20000 {
            props.insert(format!("field_{i}"), serde_json::json!({"type": "string"}));
        }
        let schema = serde_json::json!({"type": "object", "properties": props});
        let result = validator.validate(&schema, &serde_json::json!({}));
        assert!(matches!(result, Err(SchemaError::TooLarge(_))));
    }

    #[test]
    fn overly_deep_schema_is_rejected() {
        let validator = SchemaValidator::new();
        let mut schema = serde_json::json!({"type": "string"});
        for _ in 0..25 {
            schema = serde_json::json!({"type": "object", "properties": {"nested": schema}});
        }
        let result = validator.validate(&schema, &serde_json::json!({}));
        assert!(matches!(result, Err(SchemaError::TooDeep(_))));
    }

    #[test]
    fn repeated_validate_reuses_cached_compiled_validator() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({"type": "string"});
        for _ in 0..3 {
            let outcome = validator.validate(&schema, &serde_json::json!("x")).unwrap();
            assert!(outcome.valid);
        }
        assert_eq!(validator.cache.len(), 1);
    }
}
