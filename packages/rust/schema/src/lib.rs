//! Validation of untrusted model output against versioned JSON Schemas.
//!
//! A [`SchemaValidator`] is compiled once from `<dir>/<name>.<version>.json`
//! and offers two views of the same check: [`SchemaValidator::validate_or_throw`]
//! returns an error carrying every violation, [`SchemaValidator::validate`]
//! folds the outcome into a [`SafeExtractionResult`].

use std::collections::HashMap;

use intake_shared::{
    FieldViolation, IntakeError, RawModelOutput, Result, SafeExtractionResult, SchemaLocation,
    ValidatedIntent,
};
use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use tracing::{debug, instrument};

/// Field name used for document-level violations.
const ROOT_FIELD: &str = "root";

/// A compiled, versioned schema.
pub struct SchemaValidator {
    version: String,
    validator: jsonschema::Validator,
    /// Declaration order of top-level properties.
    field_order: HashMap<String, usize>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Load and compile the schema at `location`.
    pub fn load(location: &SchemaLocation) -> Result<Self> {
        let path = location.file_path();
        let text = std::fs::read_to_string(&path).map_err(|e| IntakeError::io(&path, e))?;
        let schema: Value = serde_json::from_str(&text).map_err(|e| {
            IntakeError::config(format!("schema {} is not valid JSON: {e}", path.display()))
        })?;
        debug!(path = %path.display(), version = %location.version, "loaded schema");
        Self::from_value(location.version.clone(), &schema)
    }

    /// Compile an in-memory schema.
    pub fn from_value(version: impl Into<String>, schema: &Value) -> Result<Self> {
        let version = version.into();
        let validator = jsonschema::Validator::new(schema)
            .map_err(|e| IntakeError::config(format!("schema {version} does not compile: {e}")))?;

        let field_order = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .keys()
                    .enumerate()
                    .map(|(i, k)| (k.clone(), i))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            version,
            validator,
            field_order,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Parse and check `raw`, failing with every violation found.
    #[instrument(skip_all, fields(version = %self.version))]
    pub fn validate_or_throw(&self, raw: &RawModelOutput) -> Result<ValidatedIntent> {
        self.check(raw)
            .map_err(|violations| IntakeError::SchemaValidation { violations })
    }

    /// Same check as [`validate_or_throw`](Self::validate_or_throw), reported
    /// as data. Never fails.
    #[instrument(skip_all, fields(version = %self.version))]
    pub fn validate(&self, raw: &RawModelOutput) -> SafeExtractionResult {
        match self.check(raw) {
            Ok(intent) => SafeExtractionResult::ok(intent),
            Err(violations) => SafeExtractionResult::invalid(violations),
        }
    }

    fn check(&self, raw: &RawModelOutput) -> std::result::Result<ValidatedIntent, Vec<FieldViolation>> {
        let text = strip_code_fences(raw.as_str());
        let candidate: Value = serde_json::from_str(text).map_err(|e| {
            vec![FieldViolation::new(
                ROOT_FIELD,
                format!("output is not valid JSON: {e}"),
            )]
        })?;

        let mut violations: Vec<FieldViolation> = self
            .validator
            .iter_errors(&candidate)
            .map(|error| {
                let mut segments: Vec<String> = error
                    .instance_path
                    .to_string()
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if let ValidationErrorKind::Required { property } = &error.kind {
                    segments.push(property.as_str().map_or_else(|| property.to_string(), str::to_string));
                }
                let field = if segments.is_empty() {
                    ROOT_FIELD.to_string()
                } else {
                    segments.join(".")
                };
                FieldViolation::new(field, error.to_string())
            })
            .collect();

        // The version stamp is serialized next to the payload fields.
        if candidate
            .as_object()
            .is_some_and(|fields| fields.contains_key(ValidatedIntent::VERSION_FIELD))
        {
            violations.push(FieldViolation::new(
                ValidatedIntent::VERSION_FIELD,
                format!(
                    "\"{}\" is reserved for the validating schema version",
                    ValidatedIntent::VERSION_FIELD
                ),
            ));
        }

        if !violations.is_empty() {
            // Stable: violations on the same field keep discovery order.
            violations.sort_by_key(|v| self.rank(&v.field));
            debug!(count = violations.len(), "schema violations");
            return Err(violations);
        }

        match candidate {
            Value::Object(fields) => Ok(ValidatedIntent::from_validated(&self.version, fields)),
            other => Err(vec![FieldViolation::new(
                ROOT_FIELD,
                format!("expected a JSON object, got {}", json_type_name(&other)),
            )]),
        }
    }

    /// Sort key: root first, then schema declaration order, then undeclared.
    fn rank(&self, field: &str) -> usize {
        if field == ROOT_FIELD {
            return 0;
        }
        let top = field.split('.').next().unwrap_or(field);
        self.field_order
            .get(top)
            .map_or(usize::MAX, |i| i + 1)
    }
}

/// Unwrap a Markdown code fence (with or without a language tag).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn order_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "intent": {"type": "string", "enum": ["warranty_lookup", "stock_check"]},
                "product": {"type": "string"},
                "quantity": {"type": "integer"}
            },
            "required": ["intent", "product"]
        })
    }

    fn validator() -> SchemaValidator {
        SchemaValidator::from_value("test", &order_schema()).unwrap()
    }

    fn raw(text: &str) -> RawModelOutput {
        RawModelOutput::new(text)
    }

    #[test]
    fn valid_payload_passes() {
        let intent = validator()
            .validate_or_throw(&raw(r#"{"intent":"warranty_lookup","product":"X100"}"#))
            .unwrap();
        assert_eq!(intent.get_str("intent"), Some("warranty_lookup"));
        assert_eq!(intent.schema_version(), "test");
    }

    #[test]
    fn reports_both_missing_required_fields() {
        let err = validator().validate_or_throw(&raw("{}")).unwrap_err();
        let fields: Vec<&str> = err.violations().iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["intent", "product"]);
    }

    #[test]
    fn violations_follow_declaration_order() {
        // quantity is declared after intent, but the payload lists it first
        let result = validator().validate(&raw(
            r#"{"quantity":"three","intent":"refund","product":"X100"}"#,
        ));
        assert!(!result.valid);
        assert!(result.data.is_none());
        let fields: Vec<&str> = result.errors.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["intent", "quantity"]);
    }

    #[test]
    fn unparsable_output_is_a_violation() {
        let err = validator()
            .validate_or_throw(&raw("The intent is warranty lookup."))
            .unwrap_err();
        assert!(matches!(err, IntakeError::SchemaValidation { .. }));
        assert_eq!(err.violations()[0].field, "root");
    }

    #[test]
    fn non_object_rejected_even_when_schema_is_permissive() {
        let v = SchemaValidator::from_value("any", &json!({})).unwrap();
        let result = v.validate(&raw("[1, 2]"));
        assert!(!result.valid);
        assert!(result.errors[0].message.contains("array"));
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let text = "```json\n{\"intent\":\"stock_check\",\"product\":\"A1\"}\n```";
        let result = validator().validate(&raw(text));
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());

        assert_eq!(strip_code_fences("```\n{}"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn payload_cannot_override_version_stamp() {
        let v = SchemaValidator::from_value("v1", &json!({"type": "object"})).unwrap();
        let err = v
            .validate_or_throw(&raw(r#"{"intent":"other","schema_version":"v9"}"#))
            .unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].field, "schema_version");

        let result = v.validate(&raw(r#"{"schema_version":"v9"}"#));
        assert!(!result.valid);
        assert!(result.data.is_none());

        let intent = v.validate_or_throw(&raw(r#"{"intent":"other"}"#)).unwrap();
        let json: Value = serde_json::from_str(&serde_json::to_string(&intent).unwrap()).unwrap();
        assert_eq!(json["schema_version"], json!("v1"));
    }

    #[test]
    fn invalid_schema_is_config_error() {
        let err = SchemaValidator::from_value("bad", &json!({"type": 12})).unwrap_err();
        assert!(matches!(err, IntakeError::Config { .. }));
    }

    #[test]
    fn loads_repository_schema() {
        let location = SchemaLocation {
            dir: PathBuf::from("../../../schemas"),
            name: "intent".into(),
            version: "v1".into(),
        };
        let v = SchemaValidator::load(&location).unwrap();
        assert_eq!(v.version(), "v1");

        let intent = v
            .validate_or_throw(&raw(r#"{"intent":"warranty_lookup"}"#))
            .unwrap();
        assert_eq!(intent.get_str("intent"), Some("warranty_lookup"));

        let err = v.validate_or_throw(&raw(r#"{"intent":"chit_chat"}"#)).unwrap_err();
        assert_eq!(err.violations()[0].field, "intent");
    }

    #[test]
    fn missing_schema_file_is_io_error() {
        let location = SchemaLocation {
            dir: PathBuf::from("/nonexistent"),
            name: "intent".into(),
            version: "v7".into(),
        };
        assert!(matches!(
            SchemaValidator::load(&location),
            Err(IntakeError::Io { .. })
        ));
    }
}
