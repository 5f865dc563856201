//! Request-level workflows for intake.
//!
//! - [`IntentPipeline`]: question in, validated intent out, with the model
//!   call wrapped in a [`RetryExecutor`]
//! - [`StagedBulkWriter`]: chunked record ingestion into staging
//! - [`Reconciler`]: merge routines that move staging into canonical storage
//!
//! These are the only entry points a host (CLI, HTTP layer) should call.

pub mod extraction;
pub mod reconcile;
pub mod retry;
pub mod staging;

pub use extraction::IntentPipeline;
pub use reconcile::Reconciler;
pub use retry::RetryExecutor;
pub use staging::{SilentStagingProgress, StagedBulkWriter, StagingProgress};
