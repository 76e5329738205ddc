mod atomic;
mod env;
mod registry;
mod snapshot;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use uuid::Uuid;

use tdm_core::{ConfigError, Template, template_json_schema, validate_template};
use tdm_engine::{EngineOptions, MemoryPlatform, RunReport, SyncEngine, SyncError};

use env::{EnvError, EnvMap};
use registry::{RunContext, RunPaths, init_run_logging, start_run, write_report};
use snapshot::{SnapshotError, load_snapshot, persist_snapshot};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("environment error: {0}")]
    Env(#[from] EnvError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "tdm", version, about = "Relationship-aware test data refresh")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a template from its source environment into its target.
    Run(RunArgs),
    /// Validate a template without touching any environment.
    Validate(ValidateArgs),
    /// Print the template JSON Schema.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Template file (JSON).
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,
    /// Environment map (TOML).
    #[arg(long, default_value = "config/env.map.toml")]
    env_map: PathBuf,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Query only; submit no delete or upsert jobs.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Seed for fake.* masks.
    #[arg(long)]
    seed: Option<u64>,
    /// Skip the target email settings confirmation.
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Template file (JSON).
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_template(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Schema(args) => run_schema(args),
    }
}

async fn run_template(args: RunArgs) -> Result<(), CliError> {
    let RunArgs {
        template: template_path,
        env_map: env_map_path,
        run_dir,
        dry_run,
        seed,
        yes,
    } = args;

    let template = Template::from_path(&template_path)?;
    let env_map = EnvMap::load(&env_map_path)?;
    let source_dir = env_map.snapshot_dir(&template.source)?;
    let target_dir = env_map.snapshot_dir(&template.target)?;

    if !yes && !confirm("Are the target environment email settings correct?")? {
        println!("Please correct email settings and return.");
        return Ok(());
    }

    let run_ctx = RunContext {
        run_id: Uuid::new_v4().to_string(),
        started_at: chrono::Utc::now(),
        run_dir,
        template: template_path.clone(),
        env_map: env_map_path,
        source: template.source.clone(),
        target: template.target.clone(),
        dry_run,
        mask_seed: seed,
    };
    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;

    tracing::info!(
        event = "run_started",
        run_id = %run_ctx.run_id,
        template = %template_path.display(),
        source = %template.source,
        target = %template.target,
        dry_run
    );
    let timer = Instant::now();

    let source = Arc::new(load_snapshot(&source_dir)?);
    let target = Arc::new(load_snapshot(&target_dir)?);
    let options = EngineOptions {
        dry_run,
        mask_seed: seed,
    };
    let mut engine = SyncEngine::with_target(source, target.clone(), options);

    let outcome = engine.run_template(&template).await;
    let result = finish_run(&run_paths, &target, &target_dir, dry_run, outcome);
    let duration_ms = timer.elapsed().as_millis() as u64;
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(
                event = "run_finished",
                status = "failed",
                error = %err,
                duration_ms,
                run_path = %run_paths.root.display()
            );
            return Err(err);
        }
    };

    tracing::info!(
        event = "run_finished",
        status = "success",
        duration_ms,
        run_path = %run_paths.root.display()
    );
    println!("Completed {} template run.", template_path.display());
    println!("{}", report.summary);
    Ok(())
}

/// Record the run outcome: the report (partial when an operation failed)
/// and, outside dry runs, the target snapshot with whatever was applied.
fn finish_run(
    run_paths: &RunPaths,
    target: &MemoryPlatform,
    target_dir: &Path,
    dry_run: bool,
    outcome: Result<RunReport, SyncError>,
) -> Result<RunReport, CliError> {
    let report = match &outcome {
        Ok(report) => Some(report),
        Err(err) => err.partial_report(),
    };
    if let Some(report) = report {
        write_report(run_paths, report)?;
        if !dry_run {
            persist_snapshot(target, target_dir)?;
        }
    }
    outcome.map_err(CliError::from)
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let template = Template::from_path(&args.template)?;
    let report = validate_template(&template);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_ok() {
        Ok(())
    } else {
        Err(ConfigError::Validation(report).into())
    }
}

fn run_schema(args: SchemaArgs) -> Result<(), CliError> {
    let schema = template_json_schema()?;
    match args.out {
        Some(path) => {
            atomic::write_json_atomic(&path, &schema)?;
            println!("schema written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&schema)?),
    }
    Ok(())
}

/// Ask a yes/no question on stdin; anything but `y`/`yes` declines.
fn confirm(prompt: &str) -> io::Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt} [y/N] ")?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
