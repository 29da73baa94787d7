use anyhow::{bail, Context, Result};
use clap::Parser;
use redline::cancel::CancelToken;
use redline::config::Config;
use redline::discovery::{gather_files, DiscoveryOptions};
use redline::error::LedgerError;
use redline::events::EventLog;
use redline::generator::{
    choose_model, fallback_candidates, smoke_timeout, ModelChoice, OllamaGenerator, RetryPolicy,
};
use redline::ledger::Ledger;
use redline::orchestrator::{ApplyMode, EditOptions, Orchestrator};
use redline::report::{self, ConsoleReporter};
use redline::session::{Session, SessionOptions};
use redline::store::StatePaths;
use redline::vault::restore_siblings;
use redline::{cache::KeyStrategy, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

const EXIT_MISSING_TARGET: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;
/// How long the worker gets to checkpoint after Ctrl-C before the process exits anyway.
const INTERRUPT_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(
    name = "redline",
    about = "Rewrite source files with a local model, with per-run backups and undo",
    version
)]
struct Args {
    /// File or directory to operate on (defaults to --root)
    target: Option<PathBuf>,

    /// Instruction for the model (required unless listing, undoing or reverting)
    #[arg(short, long)]
    instruction: Option<String>,

    /// Repository root holding .redline/ (defaults to current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Write changes to disk (makes backups)
    #[arg(long)]
    apply: bool,

    /// Write changes without prompting (implies --apply)
    #[arg(long)]
    auto_apply: bool,

    /// Ask for confirmation per file before applying
    #[arg(long)]
    confirm: bool,

    /// Recurse into directories (default for directory targets)
    #[arg(long, overrides_with = "no_recursive")]
    recursive: bool,

    /// Only process the top level of a directory target
    #[arg(long)]
    no_recursive: bool,

    /// Limit to these file extensions (e.g. .py .md)
    #[arg(long, num_args = 1..)]
    ext: Vec<String>,

    /// Directory names to exclude
    #[arg(long, num_args = 1..)]
    exclude: Vec<String>,

    /// Restore files from their .bak siblings
    #[arg(long)]
    revert: bool,

    /// Disable the change cache; always call the model
    #[arg(long)]
    no_memory: bool,

    /// Change cache location (defaults to .redline/memory.json)
    #[arg(long)]
    memory_file: Option<PathBuf>,

    /// Delete the change cache before running
    #[arg(long)]
    invalidate_memory: bool,

    /// Seconds to wait for a model response
    #[arg(long)]
    llm_timeout: Option<u64>,

    /// Ollama model name
    #[arg(long)]
    model: Option<String>,

    /// Do not fall back to another installed model
    #[arg(long)]
    no_auto_model: bool,

    /// Retries per file after a failed model call
    #[arg(long)]
    retries: Option<u32>,

    /// Base backoff seconds between retries (doubles each retry)
    #[arg(long)]
    backoff: Option<f64>,

    /// Cache key: `content` (default) or `stat` (mtime and size only)
    #[arg(long, value_parser = parse_key_strategy)]
    key_strategy: Option<KeyStrategy>,

    /// Debug diagnostics on stderr
    #[arg(long)]
    debug: bool,

    /// List previous runs
    #[arg(long)]
    list_runs: bool,

    /// Undo a previous run by id
    #[arg(long, value_name = "ID")]
    undo_run: Option<String>,

    /// Store the effective settings (config file plus these flags) as new defaults
    #[arg(long)]
    save_config: bool,
}

impl Args {
    fn mode(&self) -> ApplyMode {
        if self.confirm {
            ApplyMode::Confirm
        } else if self.apply || self.auto_apply {
            ApplyMode::Apply
        } else {
            ApplyMode::Preview
        }
    }

    /// Flags win over the config file.
    fn merge_into(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(secs) = self.llm_timeout {
            config.llm_timeout_secs = secs;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(backoff) = self.backoff {
            config.backoff_secs = backoff;
        }
        if let Some(strategy) = self.key_strategy {
            config.key_strategy = strategy;
        }
        if self.no_auto_model {
            config.auto_model = false;
        }
        config.excludes.extend(self.exclude.iter().cloned());
    }
}

fn parse_key_strategy(value: &str) -> Result<KeyStrategy, String> {
    match value {
        "content" => Ok(KeyStrategy::Content),
        "stat" => Ok(KeyStrategy::Stat),
        other => Err(format!("unknown key strategy '{}' (expected content or stat)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init_subscriber(logging::default_level(args.debug));

    let mut config = Config::load();
    args.merge_into(&mut config);
    if args.save_config {
        config.save().map_err(anyhow::Error::msg)?;
        println!("Saved settings to {}", Config::config_location());
        return Ok(ExitCode::SUCCESS);
    }

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let root = std::path::absolute(args.root.clone().unwrap_or(cwd))?;
    let mut paths = StatePaths::new(&root);
    if let Some(memory_file) = &args.memory_file {
        paths = paths.with_cache_file(std::path::absolute(memory_file)?);
    }

    if args.list_runs {
        list_runs(&paths);
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(run_id) = &args.undo_run {
        return undo_run(&paths, run_id);
    }

    let target = match &args.target {
        Some(target) => std::path::absolute(target)?,
        None => root.clone(),
    };
    if !target.exists() {
        println!("Target does not exist: {}", target.display());
        return Ok(ExitCode::from(EXIT_MISSING_TARGET));
    }

    let recursive = if args.no_recursive {
        false
    } else {
        args.recursive || target.is_dir()
    };
    let extensions = (!args.ext.is_empty()).then_some(args.ext.as_slice());
    let files = gather_files(
        &target,
        &DiscoveryOptions::new(recursive, extensions, &config.excludes),
    );
    if files.is_empty() {
        println!("No files found under {}", target.display());
        return Ok(ExitCode::SUCCESS);
    }

    if args.revert {
        report::print_revert(&restore_siblings(&files));
        return Ok(ExitCode::SUCCESS);
    }

    let Some(instruction) = args.instruction.clone() else {
        bail!("an instruction is required (-i \"...\")");
    };

    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let batch = Batch {
        root,
        paths,
        files,
        config,
        mode: args.mode(),
        instruction,
        session_options: SessionOptions {
            use_cache: !args.no_memory,
            invalidate_cache: args.invalidate_memory,
        },
    };
    let mut worker = tokio::task::spawn_blocking(move || batch.run(&worker_cancel));

    tokio::select! {
        result = &mut worker => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted; saving progress...");
            cancel.cancel();
            match tokio::time::timeout(INTERRUPT_GRACE, &mut worker).await {
                Ok(result) => result?,
                Err(_) => {
                    // Still blocked (e.g. on a confirmation prompt); checkpoints already hold
                    // every finished file.
                    tracing::warn!("worker did not stop within {}s", INTERRUPT_GRACE.as_secs());
                    std::process::exit(EXIT_INTERRUPTED.into());
                }
            }
        }
    }
}

fn list_runs(paths: &StatePaths) {
    let mut events = EventLog::new();
    let ledger = Ledger::load(paths, &mut events);
    let runs = ledger.list_runs();
    if runs.is_empty() {
        println!("No runs found");
        return;
    }
    for run in &runs {
        println!("{}", report::run_line(run));
    }
}

fn undo_run(paths: &StatePaths, run_id: &str) -> Result<ExitCode> {
    let mut events = EventLog::new();
    let ledger = Ledger::load(paths, &mut events);
    match ledger.undo_run(run_id, &mut events) {
        Ok(undo) => {
            println!("{}", report::undo_line(run_id, &undo));
            Ok(ExitCode::SUCCESS)
        }
        Err(LedgerError::UnknownRun(id)) => {
            println!("No run with id {} (see --list-runs)", id);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

/// Everything the blocking worker needs.
struct Batch {
    root: PathBuf,
    paths: StatePaths,
    files: Vec<PathBuf>,
    config: Config,
    mode: ApplyMode,
    instruction: String,
    session_options: SessionOptions,
}

impl Batch {
    fn run(self, cancel: &CancelToken) -> Result<ExitCode> {
        let generator = OllamaGenerator::new();
        let Some(model) = select_model(&generator, &self.config, cancel) else {
            if cancel.is_cancelled() {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
            return Ok(ExitCode::FAILURE);
        };

        println!(
            "Found {} files. Running with instruction: {:?}",
            self.files.len(),
            self.instruction
        );

        let mut session = Session::open(&self.root, self.paths.clone(), self.session_options);
        if self.mode.writes() {
            let run_id = session
                .begin_run(&self.instruction)
                .context("Failed to start run")?;
            tracing::info!("run {}", run_id);
        }

        let options = EditOptions {
            instruction: self.instruction.clone(),
            mode: self.mode,
            model,
            timeout: Duration::from_secs(self.config.llm_timeout_secs),
            retry: RetryPolicy::new(
                self.config.retries,
                Duration::try_from_secs_f64(self.config.backoff_secs).unwrap_or_default(),
            ),
            key_strategy: self.config.key_strategy,
        };
        let reporter = ConsoleReporter::new(self.files.len(), self.mode != ApplyMode::Confirm);
        let report = Orchestrator::new(&mut session, &generator, options)
            .with_reporter(reporter)
            .with_cancel(cancel.clone())
            .run(&self.files);

        let summary = session.close();
        println!("{}", report::batch_summary(&report));
        if let Some(run_id) = summary.run_id.as_deref().filter(|_| summary.records > 0) {
            println!("Run {}: {} backups (undo with --undo-run {})", run_id, summary.records, run_id);
        }
        if !summary.events.is_empty() {
            println!("{} warnings (rerun with --debug for details)", summary.events.len());
        }

        if report.interrupted {
            println!("Interrupted; progress saved.");
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Make sure a usable model is installed and answers, falling back when allowed.
fn select_model(generator: &OllamaGenerator, config: &Config, cancel: &CancelToken) -> Option<String> {
    let requested = config.model.as_str();
    let installed = generator.installed_models();
    tracing::debug!("installed ollama models: {:?}", installed);

    let mut model = requested.to_string();
    match choose_model(requested, &installed, &config.fallback_models) {
        ModelChoice::Requested => {}
        ModelChoice::Fallback(fallback) if config.auto_model => {
            println!(
                "Requested model '{}' is not installed. Falling back to installed model: {}",
                requested, fallback
            );
            model = fallback;
        }
        _ => {
            println!(
                "Requested model '{}' is not installed. Installed models: {:?}",
                requested, installed
            );
            println!("Use --model to pick an installed model or run `ollama pull <model>` to install it.");
            return None;
        }
    }

    let timeout = smoke_timeout(config.llm_timeout_secs);
    println!(
        "Testing model '{}' with a short smoke test (timeout {}s)...",
        model,
        timeout.as_secs()
    );
    match generator.smoke_test(&model, timeout, cancel) {
        Ok(()) => return Some(model),
        Err(reason) => println!("Selected model '{}' failed the smoke test: {}", model, reason),
    }
    if !config.auto_model {
        return None;
    }

    let candidates = fallback_candidates(&model, &installed, &config.fallback_models);
    for candidate in &candidates {
        if cancel.is_cancelled() {
            return None;
        }
        tracing::debug!("trying fallback model {}", candidate);
        if generator.smoke_test(candidate, timeout, cancel).is_ok() {
            println!("Falling back to installed model: {}", candidate);
            return Some(candidate.clone());
        }
    }
    println!("No installed fallback model succeeded (tried: {:?}). Aborting.", candidates);
    None
}
