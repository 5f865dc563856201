//! Merging staging into canonical storage.

use std::sync::Arc;

use intake_shared::{IntakeError, ReconciliationResult, Result, StagingTarget};
use intake_storage::{RoutineParams, RoutineStore};
use tracing::{info, instrument};

/// Invokes merge routines. Never retries: a merge that failed part-way
/// must be inspected before it is run again.
pub struct Reconciler {
    store: Arc<dyn RoutineStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RoutineStore>) -> Self {
        Self { store }
    }

    /// Run merge routine `routine` with no parameters.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, routine: &str) -> Result<ReconciliationResult> {
        let output = self
            .store
            .call_routine(routine, &RoutineParams::new())
            .await
            .map_err(|e| IntakeError::Reconciliation {
                routine: routine.to_string(),
                message: e.to_string(),
            })?;

        info!(rows_affected = output.rows_affected, "reconciliation complete");
        Ok(ReconciliationResult {
            rows_affected: output.rows_affected,
        })
    }

    /// Run the merge routine registered for `target`.
    pub async fn reconcile_target(&self, target: StagingTarget) -> Result<ReconciliationResult> {
        self.reconcile(target.merge_routine()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use intake_storage::{RoutineOutput, Storage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoutineStore for FlakyStore {
        async fn call_routine(&self, name: &str, params: &RoutineParams) -> Result<RoutineOutput> {
            assert!(params.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(IntakeError::Storage(format!("deadlock in {name}")))
        }

        async fn call_routine_batch(
            &self,
            _name: &str,
            _param_sets: &[RoutineParams],
        ) -> Result<RoutineOutput> {
            unreachable!("reconciliation never stages")
        }
    }

    #[tokio::test]
    async fn failure_is_wrapped_and_not_retried() {
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
        });
        let reconciler = Reconciler::new(store.clone());

        let err = reconciler.reconcile("DebbugProductos").await.unwrap_err();
        match &err {
            IntakeError::Reconciliation { routine, message } => {
                assert_eq!(routine, "DebbugProductos");
                assert!(message.contains("deadlock"));
            }
            other => panic!("expected Reconciliation, got {other:?}"),
        }
        assert_eq!(err.class(), intake_shared::ErrorClass::Dependency);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn merges_staged_products_end_to_end() {
        use crate::staging::{SilentStagingProgress, StagedBulkWriter};
        use intake_shared::ChunkSpec;

        let path = std::env::temp_dir().join(format!("intake_reconcile_{}.db", uuid::Uuid::now_v7()));
        let store: Arc<dyn RoutineStore> = Arc::new(Storage::open(&path).await.unwrap());
        let writer = StagedBulkWriter::new(store.clone());
        let reconciler = Reconciler::new(store.clone());
        let spec = ChunkSpec {
            chunk_size: 500,
            use_chunking: false,
        };

        writer
            .write(
                StagingTarget::Products,
                &[json!({"sku": "SKU-2", "price": 10})],
                &spec,
                &SilentStagingProgress,
            )
            .await
            .unwrap();
        reconciler
            .reconcile_target(StagingTarget::Products)
            .await
            .unwrap();

        // one new record, one update to an existing key
        writer
            .write(
                StagingTarget::Products,
                &[
                    json!({"sku": "SKU-1", "price": 5}),
                    json!({"sku": "SKU-2", "price": 12}),
                ],
                &spec,
                &SilentStagingProgress,
            )
            .await
            .unwrap();
        let result = reconciler.reconcile("DebbugProductos").await.unwrap();
        assert!(result.rows_affected >= 2);

        let pending = store
            .call_routine(StagingTarget::Products.pending_routine(), &RoutineParams::new())
            .await
            .unwrap();
        assert_eq!(pending.first_row().unwrap()["pending"], json!(0));

        let listed = store
            .call_routine(StagingTarget::Products.list_routine(), &RoutineParams::new())
            .await
            .unwrap();
        let keys: Vec<&str> = listed
            .rows
            .iter()
            .filter_map(|r| r["record_key"].as_str())
            .collect();
        assert_eq!(keys, vec!["SKU-1", "SKU-2"]);
        let updated: serde_json::Value =
            serde_json::from_str(listed.rows[1]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(updated["price"], json!(12));

        let again = reconciler.reconcile("DebbugProductos").await.unwrap();
        assert_eq!(again.rows_affected, 0);
    }

    #[tokio::test]
    async fn unknown_routine_is_reconciliation_error() {
        let path = std::env::temp_dir().join(format!("intake_reconcile_{}.db", uuid::Uuid::now_v7()));
        let store = Arc::new(Storage::open(&path).await.unwrap());
        let err = Reconciler::new(store)
            .reconcile("DebbugOrders")
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Reconciliation { .. }));
    }
}
