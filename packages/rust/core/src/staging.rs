//! Chunked bulk writes into the staging area.

use std::sync::Arc;

use chrono::Utc;
use intake_shared::{ChunkSpec, IntakeError, Result, StagingTarget, WriteReport};
use intake_storage::{RoutineParams, RoutineStore};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for staging writes.
pub trait StagingProgress: Send + Sync {
    /// Chunk `current` of `total` committed `records` rows.
    fn chunk_written(&self, current: usize, total: usize, records: usize);
}

/// No-op staging progress.
pub struct SilentStagingProgress;

impl StagingProgress for SilentStagingProgress {
    fn chunk_written(&self, _current: usize, _total: usize, _records: usize) {}
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes record batches into a target's staging table through its stage
/// routine.
///
/// Each chunk is one store transaction. Chunks are not atomic with each
/// other: when chunk `n` fails, chunks `0..n` stay committed and the error
/// says how many there were.
pub struct StagedBulkWriter {
    store: Arc<dyn RoutineStore>,
}

impl StagedBulkWriter {
    pub fn new(store: Arc<dyn RoutineStore>) -> Self {
        Self { store }
    }

    /// Write `batch` to `target`'s staging area.
    ///
    /// The batch goes out in one call unless chunking is enabled and it is
    /// larger than `spec.chunk_size`, in which case it is split into
    /// consecutive chunks written in order. A failure in a split batch is
    /// reported as [`IntakeError::PartialWrite`]; a single-call write
    /// reports the underlying failure directly since nothing was committed.
    #[instrument(skip_all, fields(target = %target, records = batch.len()))]
    pub async fn write(
        &self,
        target: StagingTarget,
        batch: &[Value],
        spec: &ChunkSpec,
        progress: &dyn StagingProgress,
    ) -> Result<WriteReport> {
        if spec.chunk_size == 0 {
            return Err(IntakeError::invalid_request("chunk_size must be greater than 0"));
        }
        if batch.is_empty() {
            debug!("empty batch, nothing to stage");
            return Ok(WriteReport {
                chunks_written: 0,
                records_written: 0,
            });
        }

        let chunk_size = if spec.use_chunking && batch.len() > spec.chunk_size {
            spec.chunk_size
        } else {
            batch.len()
        };
        let total = batch.len().div_ceil(chunk_size);

        let mut records_written = 0;
        for (i, chunk) in batch.chunks(chunk_size).enumerate() {
            if let Err(err) = self.write_chunk(target, chunk, records_written).await {
                if total == 1 {
                    return Err(err);
                }
                warn!(
                    chunk = i + 1,
                    total,
                    chunks_completed = i,
                    records_written,
                    error = %err,
                    "chunk write failed, earlier chunks remain committed"
                );
                return Err(IntakeError::PartialWrite {
                    chunks_completed: i,
                    records_written,
                    source: Box::new(err),
                });
            }
            records_written += chunk.len();
            debug!(chunk = i + 1, total, records = chunk.len(), "chunk staged");
            progress.chunk_written(i + 1, total, chunk.len());
        }

        info!(chunks = total, records = records_written, "batch staged");
        Ok(WriteReport {
            chunks_written: total,
            records_written,
        })
    }

    /// Shape-check every record, then stage the chunk in one transaction.
    async fn write_chunk(
        &self,
        target: StagingTarget,
        chunk: &[Value],
        offset: usize,
    ) -> Result<()> {
        let staged_at = Utc::now().to_rfc3339();
        let params = chunk
            .iter()
            .enumerate()
            .map(|(i, record)| stage_params(target, record, offset + i, &staged_at))
            .collect::<Result<Vec<_>>>()?;

        self.store
            .call_routine_batch(target.stage_routine(), &params)
            .await?;
        Ok(())
    }
}

/// Check a record's basic shape and build its stage-routine parameters.
fn stage_params(
    target: StagingTarget,
    record: &Value,
    index: usize,
    staged_at: &str,
) -> Result<RoutineParams> {
    let key = record_key(target, record).map_err(|message| IntakeError::MalformedRecord {
        index,
        message,
    })?;

    let payload = record.to_string();
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let payload_hash = format!("{:x}", hasher.finalize());

    Ok(RoutineParams::new()
        .with("record_key", key)
        .with("payload", payload)
        .with("payload_hash", payload_hash)
        .with("staged_at", staged_at))
}

/// A record is a non-empty object whose key field is a non-empty string
/// or an integer.
fn record_key(target: StagingTarget, record: &Value) -> std::result::Result<String, String> {
    let field = target.key_field();
    let object = match record {
        Value::Object(map) if !map.is_empty() => map,
        Value::Object(_) => return Err("record is an empty object".into()),
        other => return Err(format!("record must be a JSON object, got {other}")),
    };

    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(_) => Err(format!("key field '{field}' must be a non-empty string or an integer")),
        None => Err(format!("missing key field '{field}'")),
    }
}
