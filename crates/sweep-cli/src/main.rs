mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use sweep_runner::{
    plan_digest, write_jsonl_file, Battery, Configuration, GradleExecutor, NexmarkDecoder,
    SeriesInfo, SeriesRunner, SeriesStore, SweepPlan,
};
use tracing_subscriber::EnvFilter;

use crate::settings::{Settings, SettingsLayer};

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Resumable Nexmark benchmark sweeps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the configurations of a sweep come from.
#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Built-in sweep: battery03, battery04 or battery05.
    #[arg(long)]
    battery: Option<Battery>,
    /// YAML or JSON sweep plan.
    #[arg(long)]
    plan: Option<PathBuf>,
}

#[derive(Args, Clone, Debug, Default)]
struct PathArgs {
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    gradle: Option<PathBuf>,
    #[arg(long)]
    beam_dir: Option<PathBuf>,
    #[arg(long)]
    results_js: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the series if needed, run every pending benchmark and export.
    Run {
        #[arg(long)]
        series: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Replace a stored series, discarding all of its results.
        #[arg(long)]
        recreate: bool,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the configurations a sweep expands to.
    Plan {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(long)]
        series: Option<String>,
        #[command(flatten)]
        paths: PathArgs,
        #[arg(long)]
        json: bool,
    },
    Export {
        #[arg(long)]
        series: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        paths: PathArgs,
    },
    Delete {
        #[arg(long)]
        series: String,
        #[command(flatten)]
        paths: PathArgs,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            series,
            source,
            recreate,
            paths,
            json,
        } => {
            let settings = resolve_settings(paths)?;
            let configs = generate(&source)?;
            let mut store = open_store(&settings)?;
            prepare_series(&mut store, &series, &configs, recreate)?;

            let executor = GradleExecutor::new(settings.tools.clone());
            let decoder = NexmarkDecoder::new(settings.tools.results_js.clone());
            let summary = SeriesRunner::new(&mut store, executor, decoder)
                .run_series(&series)
                .with_context(|| format!("series {} did not finish", series))?;

            let runs = store.series_results(&series)?;
            let report = settings.output_dir.join(format!("{}.json", series));
            write_jsonl_file(&report, &runs)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "series": series,
                    "summary": summary,
                    "report": report.display().to_string(),
                })));
            }
            println!(
                "series {}: {} runs ({} skipped, {} ok, {} failed)",
                series, summary.total, summary.skipped, summary.succeeded, summary.failed
            );
            println!("report: {}", report.display());
        }
        Commands::Plan { source, json } => {
            let configs = generate(&source)?;
            let digest = plan_digest(&configs)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan",
                    "count": configs.len(),
                    "plan_digest": digest,
                    "configurations": configs,
                })));
            }
            for (idx, config) in configs.iter().enumerate() {
                println!("{:>5}  {}", idx, serde_json::to_string(config)?);
            }
            println!("{} configurations ({})", configs.len(), digest);
        }
        Commands::Status {
            series,
            paths,
            json,
        } => {
            let settings = resolve_settings(paths)?;
            let store = open_store(&settings)?;
            let keys = match series {
                Some(key) => vec![key],
                None => store.list_series()?,
            };
            let infos = keys
                .iter()
                .map(|key| store.series_info(key))
                .collect::<sweep_runner::Result<Vec<_>>>()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "series": infos.iter().map(info_to_json).collect::<Vec<_>>(),
                })));
            }
            if infos.is_empty() {
                println!("no series in {}", settings.db_path.display());
            }
            for info in &infos {
                println!(
                    "{}: {} runs, {} ok, {} err, {} not run (created {})",
                    info.key, info.runs, info.ok, info.err, info.not_run, info.created_at
                );
            }
        }
        Commands::Export { series, out, paths } => {
            let settings = resolve_settings(paths)?;
            let store = open_store(&settings)?;
            let runs = store.series_results(&series)?;
            let out = out.unwrap_or_else(|| settings.output_dir.join(format!("{}.json", series)));
            write_jsonl_file(&out, &runs)?;
            println!("wrote {} runs to {}", runs.len(), out.display());
        }
        Commands::Delete { series, paths } => {
            let settings = resolve_settings(paths)?;
            let mut store = open_store(&settings)?;
            if store.delete_series(&series)? {
                println!("deleted: {}", series);
            } else {
                println!("no such series: {}", series);
            }
        }
    }
    Ok(None)
}

fn resolve_settings(paths: PathArgs) -> Result<Settings> {
    let flags = SettingsLayer {
        db_path: paths.db,
        output_dir: paths.output_dir,
        gradle: paths.gradle,
        beam_dir: paths.beam_dir,
        results_js: paths.results_js,
    };
    Settings::resolve(paths.settings.as_deref(), flags)
}

fn open_store(settings: &Settings) -> Result<SeriesStore> {
    SeriesStore::open(&settings.db_path)
        .with_context(|| format!("failed to open store {}", settings.db_path.display()))
}

fn generate(source: &SourceArgs) -> Result<Vec<Configuration>> {
    let configs = match (&source.battery, &source.plan) {
        (Some(battery), _) => battery
            .configurations()
            .with_context(|| format!("failed to generate {}", battery))?,
        (None, Some(path)) => SweepPlan::load(path)
            .and_then(|plan| plan.configurations())
            .with_context(|| format!("failed to generate plan {}", path.display()))?,
        (None, None) => anyhow::bail!("either --battery or --plan is required"),
    };
    tracing::info!(configurations = configs.len(), "generated sweep");
    Ok(configs)
}

/// Stores the series unless it already exists. An existing series is
/// resumed as stored, even when today's sweep generates something else.
fn prepare_series(
    store: &mut SeriesStore,
    series: &str,
    configs: &[Configuration],
    recreate: bool,
) -> Result<()> {
    if recreate || !store.has_series(series)? {
        tracing::info!(series_key = series, "creating series");
        store.store_series(series, configs)?;
        return Ok(());
    }
    let stored = store.series_info(series)?;
    let generated = plan_digest(configs)?;
    if stored.plan_digest != generated {
        tracing::warn!(
            series_key = series,
            stored = %stored.plan_digest,
            generated = %generated,
            "stored series differs from the generated sweep; resuming the stored one (pass --recreate to replace it)"
        );
    }
    Ok(())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Plan { json, .. } | Commands::Status { json, .. } => {
            *json
        }
        _ => false,
    }
}

fn info_to_json(info: &SeriesInfo) -> Value {
    json!({
        "key": info.key,
        "created_at": info.created_at,
        "plan_digest": info.plan_digest,
        "runs": info.runs,
        "ok": info.ok,
        "err": info.err,
        "not_run": info.not_run,
        "complete": info.is_complete(),
    })
}
