//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use intake_core::{IntentPipeline, Reconciler, StagedBulkWriter, StagingProgress};
use intake_model::{OllamaInvoker, PromptTemplate};
use intake_schema::SchemaValidator;
use intake_shared::{
    AppConfig, ChunkSpec, IntakeError, ModelInvocationConfig, PromptLocation, RetryPolicy,
    SchemaLocation, StagingBatch, StagingTarget, init_config, load_config,
};
use intake_storage::{RoutineParams, RoutineStore, Storage};
use tokio_util::sync::CancellationToken;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// intake: intent extraction and staged catalog ingestion.
#[derive(Parser)]
#[command(
    name = "intake",
    version,
    about = "Extract validated intents from questions and stage catalog records.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract a validated intent from a question.
    Extract {
        /// The user's question.
        question: String,

        /// Never fail: print a {valid, errors, data} result instead.
        #[arg(long)]
        safe: bool,
    },

    /// Write a JSON array of records into a target's staging area.
    Stage {
        /// Staging target: products or datasheets.
        #[arg(short, long)]
        target: StagingTarget,

        /// Path to a JSON file holding an array of records.
        #[arg(short, long)]
        file: PathBuf,

        /// Records per chunk (overrides config).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Split large batches into chunks.
        #[arg(long)]
        chunked: bool,
    },

    /// Merge staging into canonical storage.
    Reconcile {
        /// Run the merge routine registered for this target.
        #[arg(short, long, required_unless_present = "routine", conflicts_with = "routine")]
        target: Option<StagingTarget>,

        /// Run a merge routine by name.
        #[arg(long)]
        routine: Option<String>,
    },

    /// List canonical records of a target.
    List {
        /// Staging target: products or datasheets.
        #[arg(short, long)]
        target: StagingTarget,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "intake=info",
        1 => "intake=debug",
        _ => "intake=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Extract { question, safe } => cmd_extract(&question, safe).await,
        Command::Stage {
            target,
            file,
            chunk_size,
            chunked,
        } => cmd_stage(target, &file, chunk_size, chunked).await,
        Command::Reconcile { target, routine } => cmd_reconcile(target, routine).await,
        Command::List { target } => cmd_list(target).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_extract(question: &str, safe: bool) -> Result<()> {
    let config = load_config()?;

    let invoker = OllamaInvoker::new(&ModelInvocationConfig::from(&config))?;
    let validator = SchemaValidator::load(&SchemaLocation::from(&config))?;
    let prompt = PromptTemplate::load(&PromptLocation::from(&config))?;

    let pipeline = IntentPipeline::new(
        Arc::new(invoker),
        Arc::new(validator),
        prompt,
        RetryPolicy::from(&config),
    )
    .with_cancellation(cancel_on_ctrl_c());

    info!(
        model = %config.model.model_name,
        schema = %config.schema.version,
        safe,
        "extracting intent"
    );

    let json = if safe {
        let result = pipeline.extract_intent_safe(question).await;
        serde_json::to_string_pretty(&result)?
    } else {
        let intent = pipeline.extract_intent(question).await?;
        serde_json::to_string_pretty(&intent)?
    };
    println!("{json}");
    Ok(())
}

async fn cmd_stage(
    target: StagingTarget,
    file: &Path,
    chunk_size: Option<usize>,
    chunked: bool,
) -> Result<()> {
    let config = load_config()?;

    let batch = read_batch(file)?;

    let mut spec = ChunkSpec::from(&config);
    if let Some(size) = chunk_size {
        spec.chunk_size = size;
    }
    spec.use_chunking |= chunked;

    let store = open_store(&config).await?;
    let writer = StagedBulkWriter::new(store);
    let progress = CliProgress::new();

    info!(%target, records = batch.len(), chunk_size = spec.chunk_size, chunked = spec.use_chunking, "staging batch");
    let result = writer.write(target, &batch, &spec, &progress).await;
    progress.finish();
    let report = result?;

    println!();
    println!("  Staged {} record(s) for {target}", report.records_written);
    println!("  Chunks: {}", report.chunks_written);
    println!("  Next:   intake reconcile --target {target}");
    println!();
    Ok(())
}

/// Load a staging batch; an unreadable or non-array file is bad input.
fn read_batch(file: &Path) -> intake_shared::Result<StagingBatch> {
    let content = std::fs::read_to_string(file).map_err(|e| {
        IntakeError::invalid_request(format!("cannot read {}: {e}", file.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        IntakeError::invalid_request(format!(
            "{} must hold a JSON array of records: {e}",
            file.display()
        ))
    })
}

async fn cmd_reconcile(target: Option<StagingTarget>, routine: Option<String>) -> Result<()> {
    let routine = match (target, routine) {
        (Some(target), _) => target.merge_routine().to_string(),
        (None, Some(routine)) => routine,
        (None, None) => return Err(eyre!("pass --target or --routine")),
    };

    let config = load_config()?;
    let store = open_store(&config).await?;
    let result = Reconciler::new(store).reconcile(&routine).await?;

    println!("  {routine}: {} row(s) affected", result.rows_affected);
    Ok(())
}

async fn cmd_list(target: StagingTarget) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let output = store
        .call_routine(target.list_routine(), &RoutineParams::new())
        .await?;

    if output.rows.is_empty() {
        println!("  No {target} yet.");
        return Ok(());
    }
    for row in &output.rows {
        let key = row.get("record_key").and_then(|v| v.as_str()).unwrap_or("?");
        let updated = row.get("updated_at").and_then(|v| v.as_str()).unwrap_or("");
        println!("  {key:<24} {updated}");
    }
    println!("\n  {} {target}", output.rows.len());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_store(config: &AppConfig) -> Result<Arc<dyn RoutineStore>> {
    let path = config.database_path()?;
    let storage = Storage::open(&path).await?;
    Ok(Arc::new(storage))
}

/// Token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Chunk progress bar for staging writes.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] chunk {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl StagingProgress for CliProgress {
    fn chunk_written(&self, current: usize, total: usize, records: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        self.bar.set_message(format!("{records} records"));
    }
}
