//! Embedded libSQL store for staging and reconciliation.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the staging
//! tables, the canonical tables, and the named routines that move data
//! between them. Callers never write SQL: they invoke routines by name
//! through the [`RoutineStore`] trait.

mod migrations;
mod routines;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use intake_shared::{IntakeError, Result};
use libsql::{Connection, Database, params};
use serde_json::Map;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub use routines::{RoutineOutput, RoutineParams};

use routines::{RoutineStep, StepKind, builtin_routines, from_sql_value};

/// Named-routine interface to the relational store.
///
/// Every call runs inside a single transaction: either all of its steps
/// commit or none do.
#[async_trait]
pub trait RoutineStore: Send + Sync {
    /// Run routine `name` once with `params`.
    async fn call_routine(&self, name: &str, params: &RoutineParams) -> Result<RoutineOutput>;

    /// Run routine `name` once per parameter set, all in one transaction.
    async fn call_routine_batch(
        &self,
        name: &str,
        param_sets: &[RoutineParams],
    ) -> Result<RoutineOutput>;
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    // Serializes transactions on the shared connection.
    tx_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path`, migrate it, and install any
    /// missing built-in routines.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IntakeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            tx_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        storage.install_routines().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        IntakeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    /// Insert built-in routines that are not defined yet. Existing
    /// definitions are left alone so they can be tuned in place.
    async fn install_routines(&self) -> Result<()> {
        let _guard = self.tx_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        let mut installed = 0usize;

        for def in builtin_routines() {
            let inserted = tx
                .execute(
                    "INSERT INTO routines (name, description, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO NOTHING",
                    params![def.name, def.description, now.as_str()],
                )
                .await
                .map_err(|e| IntakeError::Storage(e.to_string()))?;
            if inserted == 0 {
                continue;
            }

            for (step, RoutineStep { kind, sql }) in def.steps.iter().enumerate() {
                tx.execute(
                    "INSERT INTO routine_steps (routine_name, step, kind, sql) VALUES (?1, ?2, ?3, ?4)",
                    params![def.name, step as i64, kind.as_str(), sql.as_str()],
                )
                .await
                .map_err(|e| IntakeError::Storage(e.to_string()))?;
            }
            installed += 1;
        }

        tx.commit()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        if installed > 0 {
            debug!(installed, "installed built-in routines");
        }
        Ok(())
    }

    /// Read a routine's steps, in order.
    async fn load_routine(&self, name: &str) -> Result<Vec<RoutineStep>> {
        let mut rows = self
            .conn
            .query(
                "SELECT kind, sql FROM routine_steps WHERE routine_name = ?1 ORDER BY step",
                params![name],
            )
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        let mut steps = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?
        {
            let kind: String = row
                .get(0)
                .map_err(|e| IntakeError::Storage(e.to_string()))?;
            let sql: String = row
                .get(1)
                .map_err(|e| IntakeError::Storage(e.to_string()))?;
            let kind = StepKind::parse(&kind).ok_or_else(|| {
                IntakeError::Storage(format!("routine {name} has unknown step kind '{kind}'"))
            })?;
            steps.push(RoutineStep { kind, sql });
        }

        if steps.is_empty() {
            return Err(IntakeError::Storage(format!("unknown routine: {name}")));
        }
        Ok(steps)
    }

    /// Run every step of a routine for each parameter set inside one
    /// transaction. Rolls back on the first failing step.
    async fn run_in_transaction(
        &self,
        name: &str,
        steps: &[RoutineStep],
        param_sets: &[&RoutineParams],
    ) -> Result<RoutineOutput> {
        let _guard = self.tx_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;

        let mut output = RoutineOutput::default();
        for params in param_sets {
            for step in steps {
                match run_step(&tx, step, params).await {
                    Ok(step_output) => output.absorb(step_output),
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::warn!(routine = name, error = %rollback_err, "rollback failed");
                        }
                        return Err(IntakeError::Storage(format!("routine {name} failed: {e}")));
                    }
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| IntakeError::Storage(e.to_string()))?;
        Ok(output)
    }
}

#[async_trait]
impl RoutineStore for Storage {
    #[instrument(skip_all, fields(routine = name))]
    async fn call_routine(&self, name: &str, params: &RoutineParams) -> Result<RoutineOutput> {
        let steps = self.load_routine(name).await?;
        let output = self.run_in_transaction(name, &steps, &[params]).await?;
        debug!(
            rows = output.rows.len(),
            rows_affected = output.rows_affected,
            "routine complete"
        );
        Ok(output)
    }

    #[instrument(skip_all, fields(routine = name, calls = param_sets.len()))]
    async fn call_routine_batch(
        &self,
        name: &str,
        param_sets: &[RoutineParams],
    ) -> Result<RoutineOutput> {
        let steps = self.load_routine(name).await?;
        let sets: Vec<&RoutineParams> = param_sets.iter().collect();
        let output = self.run_in_transaction(name, &steps, &sets).await?;
        debug!(rows_affected = output.rows_affected, "routine batch complete");
        Ok(output)
    }
}

async fn run_step(
    conn: &Connection,
    step: &RoutineStep,
    params: &RoutineParams,
) -> std::result::Result<RoutineOutput, libsql::Error> {
    let bound = params.bind_for(&step.sql);
    match step.kind {
        StepKind::Exec => {
            let rows_affected = conn.execute(&step.sql, bound).await?;
            Ok(RoutineOutput {
                rows: Vec::new(),
                rows_affected,
            })
        }
        StepKind::Query => {
            let mut rows = conn.query(&step.sql, bound).await?;
            let columns: Vec<String> = (0..rows.column_count())
                .map(|i| rows.column_name(i).unwrap_or_default().to_string())
                .collect();

            let mut collected = Vec::new();
            while let Some(row) = rows.next().await? {
                let mut record = Map::new();
                for (i, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), from_sql_value(row.get_value(i as i32)?));
                }
                collected.push(record);
            }
            Ok(RoutineOutput {
                rows: collected,
                rows_affected: 0,
            })
        }
    }
}
