//! Core domain types flowing through extraction and staging.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IntakeError, Result};

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// A user question submitted for intent extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    question: String,
}

impl ExtractionRequest {
    /// Build a request, rejecting blank questions.
    pub fn new(question: impl Into<String>) -> Result<Self> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(IntakeError::invalid_request("question must not be empty"));
        }
        Ok(Self { question })
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}

/// Untrusted text returned by the model, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawModelOutput(String);

impl RawModelOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single schema violation: where and what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Dotted path of the offending field (`"root"` for document-level problems).
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A payload that passed schema validation.
///
/// Only constructed by the schema validator; immutable afterwards. The
/// payload never carries its own [`VERSION_FIELD`](Self::VERSION_FIELD),
/// so the serialized stamp is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedIntent {
    schema_version: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl ValidatedIntent {
    /// Key the schema version is serialized under, reserved in payloads.
    pub const VERSION_FIELD: &'static str = "schema_version";

    /// Wrap an already-validated object. Callers outside the validator
    /// should not need this.
    pub fn from_validated(schema_version: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            schema_version: schema_version.into(),
            fields,
        }
    }

    /// Schema version the payload was validated against.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Look up a top-level string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Outcome of a never-failing extraction.
///
/// `valid == true` implies `data` is present and `errors` is empty;
/// `valid == false` implies `data` is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeExtractionResult {
    pub valid: bool,
    pub errors: Vec<FieldViolation>,
    pub data: Option<ValidatedIntent>,
}

impl SafeExtractionResult {
    /// Successful result carrying validated data.
    pub fn ok(data: ValidatedIntent) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            data: Some(data),
        }
    }

    /// Failed result carrying the violations found.
    pub fn invalid(errors: Vec<FieldViolation>) -> Self {
        Self {
            valid: false,
            errors,
            data: None,
        }
    }

    /// Failed result describing a system/dependency failure.
    pub fn system_failure(err: &IntakeError) -> Self {
        Self::invalid(vec![FieldViolation::new("system", err.to_string())])
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// A record set that can be staged and reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingTarget {
    Products,
    Datasheets,
}

impl StagingTarget {
    pub const ALL: [StagingTarget; 2] = [Self::Products, Self::Datasheets];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Datasheets => "datasheets",
        }
    }

    /// Field that identifies a record in the canonical store.
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Products => "sku",
            Self::Datasheets => "code",
        }
    }

    /// Routine that inserts one record into staging.
    pub fn stage_routine(&self) -> &'static str {
        match self {
            Self::Products => "StageProductos",
            Self::Datasheets => "StageDatasheets",
        }
    }

    /// Routine that merges staging into the canonical table.
    pub fn merge_routine(&self) -> &'static str {
        match self {
            Self::Products => "DebbugProductos",
            Self::Datasheets => "DebbugDatasheets",
        }
    }

    /// Routine that lists canonical records.
    pub fn list_routine(&self) -> &'static str {
        match self {
            Self::Products => "ListProductos",
            Self::Datasheets => "ListDatasheets",
        }
    }

    /// Routine that counts records still waiting in staging.
    pub fn pending_routine(&self) -> &'static str {
        match self {
            Self::Products => "PendingProductos",
            Self::Datasheets => "PendingDatasheets",
        }
    }
}

impl std::fmt::Display for StagingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StagingTarget {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "products" => Ok(Self::Products),
            "datasheets" => Ok(Self::Datasheets),
            other => Err(IntakeError::invalid_request(format!(
                "unknown staging target '{other}' (expected products or datasheets)"
            ))),
        }
    }
}

/// Ordered records submitted for one ingestion call.
pub type StagingBatch = Vec<Value>;

/// Summary of a fully successful staging write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Number of store calls made (1 when the batch was not split).
    pub chunks_written: usize,
    /// Records committed to staging.
    pub records_written: usize,
}

/// Outcome of a merge routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub rows_affected: u64,
}
