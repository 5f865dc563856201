//! Built-in routine definitions and the parameter/result types of the
//! named-routine interface.
//!
//! Definitions are installed into `routines`/`routine_steps` on open; calls
//! read them back from the store, so a routine can be redefined in the
//! database without rebuilding.

use serde_json::{Map, Number, Value};

use intake_shared::StagingTarget;

// ---------------------------------------------------------------------------
// Parameters and output
// ---------------------------------------------------------------------------

/// Named parameters for a routine call.
///
/// Names are given without the `:` prefix; values are bound by name, never
/// spliced into SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineParams(Vec<(String, Value)>);

impl RoutineParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Bind only the parameters `sql` actually references.
    pub(crate) fn bind_for(&self, sql: &str) -> libsql::params::Params {
        let named: Vec<(String, libsql::Value)> = self
            .0
            .iter()
            .filter(|(name, _)| references_param(sql, name))
            .map(|(name, value)| (format!(":{name}"), to_sql_value(value)))
            .collect();

        if named.is_empty() {
            libsql::params::Params::None
        } else {
            libsql::params::Params::Named(named)
        }
    }
}

/// Result of a routine call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineOutput {
    /// Rows produced by `query` steps, in order.
    pub rows: Vec<Map<String, Value>>,
    /// Changes reported by `exec` steps, summed.
    pub rows_affected: u64,
}

impl RoutineOutput {
    /// First row, if any.
    pub fn first_row(&self) -> Option<&Map<String, Value>> {
        self.rows.first()
    }

    pub(crate) fn absorb(&mut self, other: RoutineOutput) {
        self.rows.extend(other.rows);
        self.rows_affected += other.rows_affected;
    }
}

/// Whether `sql` contains `:name` as a whole placeholder.
fn references_param(sql: &str, name: &str) -> bool {
    let needle = format!(":{name}");
    sql.match_indices(&needle).any(|(idx, _)| {
        sql[idx + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
    })
}

fn to_sql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => libsql::Value::Integer(i),
            (None, Some(f)) => libsql::Value::Real(f),
            _ => libsql::Value::Text(n.to_string()),
        },
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}

pub(crate) fn from_sql_value(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::from(i),
        libsql::Value::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        libsql::Value::Text(s) => Value::String(s),
        libsql::Value::Blob(bytes) => Value::from(bytes),
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepKind {
    Exec,
    Query,
}

impl StepKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Query => "query",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "exec" => Some(Self::Exec),
            "query" => Some(Self::Query),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RoutineStep {
    pub kind: StepKind,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RoutineDef {
    pub name: &'static str,
    pub description: &'static str,
    pub steps: Vec<RoutineStep>,
}

fn tables(target: StagingTarget) -> (&'static str, &'static str) {
    match target {
        StagingTarget::Products => ("product_staging", "products"),
        StagingTarget::Datasheets => ("datasheet_staging", "datasheets"),
    }
}

fn exec(sql: String) -> RoutineStep {
    RoutineStep {
        kind: StepKind::Exec,
        sql,
    }
}

fn query(sql: String) -> RoutineStep {
    RoutineStep {
        kind: StepKind::Query,
        sql,
    }
}

/// All routines installed on open.
pub(crate) fn builtin_routines() -> Vec<RoutineDef> {
    StagingTarget::ALL
        .iter()
        .flat_map(|&target| target_routines(target))
        .collect()
}

fn target_routines(target: StagingTarget) -> Vec<RoutineDef> {
    let (staging, canonical) = tables(target);

    // Latest staged version of each key wins.
    let latest = format!("SELECT MAX(id) FROM {staging} GROUP BY record_key");

    vec![
        RoutineDef {
            name: target.stage_routine(),
            description: "Append one record to staging",
            steps: vec![exec(format!(
                "INSERT INTO {staging} (record_key, payload, payload_hash, staged_at)
                 VALUES (:record_key, :payload, :payload_hash, :staged_at)"
            ))],
        },
        RoutineDef {
            name: target.merge_routine(),
            description: "Insert new keys, update changed keys, clear staging",
            steps: vec![
                exec(format!(
                    "INSERT INTO {canonical} (record_key, payload, payload_hash, created_at, updated_at)
                     SELECT s.record_key, s.payload, s.payload_hash, s.staged_at, s.staged_at
                     FROM {staging} s
                     WHERE s.id IN ({latest})
                       AND NOT EXISTS (SELECT 1 FROM {canonical} c WHERE c.record_key = s.record_key)"
                )),
                exec(format!(
                    "UPDATE {canonical}
                     SET payload = latest.payload,
                         payload_hash = latest.payload_hash,
                         updated_at = latest.staged_at
                     FROM (SELECT s.record_key, s.payload, s.payload_hash, s.staged_at
                           FROM {staging} s WHERE s.id IN ({latest})) AS latest
                     WHERE {canonical}.record_key = latest.record_key
                       AND {canonical}.payload_hash <> latest.payload_hash"
                )),
                exec(format!("DELETE FROM {staging}")),
            ],
        },
        RoutineDef {
            name: target.list_routine(),
            description: "List canonical records by key",
            steps: vec![query(format!(
                "SELECT record_key, payload, created_at, updated_at FROM {canonical} ORDER BY record_key"
            ))],
        },
        RoutineDef {
            name: target.pending_routine(),
            description: "Count records waiting in staging",
            steps: vec![query(format!("SELECT COUNT(*) AS pending FROM {staging}"))],
        },
    ]
}
