//! Application configuration for the intake pipeline.
//!
//! User config lives at `~/.intake/intake.toml`.
//! Environment variables override config file values, which override defaults.
//! Runtime values ([`ModelInvocationConfig`], [`RetryPolicy`], [`ChunkSpec`],
//! [`SchemaLocation`], [`PromptLocation`]) are derived once at startup and
//! passed by reference afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IntakeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "intake.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".intake";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "intake.db";

// ---------------------------------------------------------------------------
// Config structs (matching intake.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint and sampling parameters.
    #[serde(default)]
    pub model: ModelSection,

    /// Retry policy for model invocation.
    #[serde(default)]
    pub retry: RetrySection,

    /// Which schema file validates model output.
    #[serde(default)]
    pub schema: SchemaSection,

    /// Which prompt template frames the question.
    #[serde(default)]
    pub prompt: PromptSection,

    /// Bulk staging behavior.
    #[serde(default)]
    pub staging: StagingSection,

    /// Store location.
    #[serde(default)]
    pub database: DatabaseSection,
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Base URL of the model server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model to run.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Generation stops at any of these.
    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            timeout_ms: default_timeout_ms(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            stop_sequences: default_stop_sequences(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".into()
}
fn default_model_name() -> String {
    "phi3".into()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_temperature() -> f64 {
    0.1
}
fn default_top_p() -> f64 {
    0.9
}
fn default_max_tokens() -> u32 {
    500
}
fn default_stop_sequences() -> Vec<String> {
    vec!["\n\n".into(), "```".into()]
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

/// `[schema]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSection {
    /// Directory holding `<name>.<version>.json` files.
    #[serde(default = "default_schema_dir")]
    pub dir: String,

    #[serde(default = "default_intent_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            dir: default_schema_dir(),
            name: default_intent_name(),
            version: default_version(),
        }
    }
}

/// `[prompt]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSection {
    /// Directory holding `<name>.<version>.txt` files.
    #[serde(default = "default_prompt_dir")]
    pub dir: String,

    #[serde(default = "default_intent_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for PromptSection {
    fn default() -> Self {
        Self {
            dir: default_prompt_dir(),
            name: default_intent_name(),
            version: default_version(),
        }
    }
}

fn default_schema_dir() -> String {
    "schemas".into()
}
fn default_prompt_dir() -> String {
    "prompts".into()
}
fn default_intent_name() -> String {
    "intent".into()
}
fn default_version() -> String {
    "v1".into()
}

/// `[staging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub use_chunking: bool,
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            use_chunking: false,
        }
    }
}

fn default_chunk_size() -> usize {
    500
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database file. Defaults to `~/.intake/intake.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime config (derived once from AppConfig)
// ---------------------------------------------------------------------------

/// Model endpoint plus sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInvocationConfig {
    pub endpoint: String,
    pub model_name: String,
    pub timeout_ms: u64,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl ModelInvocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl From<&AppConfig> for ModelInvocationConfig {
    fn from(config: &AppConfig) -> Self {
        let m = &config.model;
        Self {
            endpoint: m.endpoint.clone(),
            model_name: m.model_name.clone(),
            timeout_ms: m.timeout_ms,
            temperature: m.temperature,
            top_p: m.top_p,
            max_tokens: m.max_tokens,
            stop_sequences: m.stop_sequences.clone(),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first, at least 1.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    /// At least 1.0, so delays never shrink.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-indexed) before the next one:
    /// `initial_delay_ms * backoff_multiplier^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(ms.round() as u64)
    }

    /// Check the policy invariants.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(IntakeError::config("retry.max_attempts must be at least 1"));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(IntakeError::config(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            initial_delay_ms: config.retry.initial_delay_ms,
            backoff_multiplier: config.retry.backoff_multiplier,
        }
    }
}

/// Whether and how to split a staging batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Records per chunk, greater than zero.
    pub chunk_size: usize,
    pub use_chunking: bool,
}

impl From<&AppConfig> for ChunkSpec {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.staging.chunk_size,
            use_chunking: config.staging.use_chunking,
        }
    }
}

/// Where a versioned schema file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLocation {
    pub dir: PathBuf,
    pub name: String,
    pub version: String,
}

impl SchemaLocation {
    /// `<dir>/<name>.<version>.json`
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.json", self.name, self.version))
    }
}

impl From<&AppConfig> for SchemaLocation {
    fn from(config: &AppConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.schema.dir),
            name: config.schema.name.clone(),
            version: config.schema.version.clone(),
        }
    }
}

/// Where a versioned prompt template lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLocation {
    pub dir: PathBuf,
    pub name: String,
    pub version: String,
}

impl PromptLocation {
    /// `<dir>/<name>.<version>.txt`
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.txt", self.name, self.version))
    }
}

impl From<&AppConfig> for PromptLocation {
    fn from(config: &AppConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.prompt.dir),
            name: config.prompt.name.clone(),
            version: config.prompt.version.clone(),
        }
    }
}

impl AppConfig {
    /// Check invariants the runtime values depend on.
    pub fn validate(&self) -> Result<()> {
        RetryPolicy::from(self).validate()?;

        if self.staging.chunk_size == 0 {
            return Err(IntakeError::config("staging.chunk_size must be greater than 0"));
        }
        if self.model.timeout_ms == 0 {
            return Err(IntakeError::config("model.timeout_ms must be greater than 0"));
        }

        let endpoint = Url::parse(&self.model.endpoint).map_err(|e| {
            IntakeError::config(format!("model.endpoint '{}': {e}", self.model.endpoint))
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(IntakeError::config(format!(
                "model.endpoint must be http or https, got '{}'",
                endpoint.scheme()
            )));
        }
        Ok(())
    }

    /// Apply environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(endpoint) = lookup("OLLAMA_BASE_URL") {
            self.model.endpoint = endpoint;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.model.model_name = model;
        }
        if let Some(timeout) = lookup("OLLAMA_TIMEOUT") {
            self.model.timeout_ms = timeout.parse().map_err(|e| {
                IntakeError::config(format!("OLLAMA_TIMEOUT '{timeout}' is not a number: {e}"))
            })?;
        }
        if let Some(version) = lookup("INTAKE_SCHEMA_VERSION") {
            self.schema.version = version;
        }
        if let Some(path) = lookup("INTAKE_DB_PATH") {
            self.database.path = Some(path);
        }
        Ok(())
    }

    /// Resolved database file path.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join(DB_FILE_NAME)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.intake/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| IntakeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.intake/intake.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load, override, and validate the application config.
/// Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IntakeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| IntakeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IntakeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IntakeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IntakeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
