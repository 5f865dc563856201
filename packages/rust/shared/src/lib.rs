//! Shared types, error model, and configuration for the intake pipeline.
//!
//! This crate is the foundation depended on by all other intake crates.
//! It provides:
//! - [`IntakeError`] — the unified error type and its [`ErrorClass`]
//! - Domain types ([`ExtractionRequest`], [`ValidatedIntent`], [`SafeExtractionResult`],
//!   [`StagingTarget`], [`WriteReport`], [`ReconciliationResult`])
//! - Configuration ([`AppConfig`], [`RetryPolicy`], [`ChunkSpec`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkSpec, ModelInvocationConfig, PromptLocation, RetryPolicy, SchemaLocation,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ErrorClass, IntakeError, Result};
pub use types::{
    ExtractionRequest, FieldViolation, RawModelOutput, ReconciliationResult,
    SafeExtractionResult, StagingBatch, StagingTarget, ValidatedIntent, WriteReport,
};
