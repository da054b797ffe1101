//! Autonomous agent orchestration loop.
//!
//! Runs an external coding agent on a task until it prints the termination
//! marker or the iteration cap is reached, then prints the run result as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atom::core::analyzer::TaskAnalyzer;
use atom::core::types::{DecompositionLevel, FailureReason, RunResult};
use atom::exit_codes;
use atom::io::config::{AtomConfig, load_config, load_rules};
use atom::io::interrupt::{CancelToken, ThreadSleeper};
use atom::io::invoker::CliInvoker;
use atom::io::memory::CommandMemoryBackend;
use atom::io::prompt::{PromptComposer, PromptSearchPaths};
use atom::io::state_store::FileStateStore;
use atom::logging;
use atom::orchestrator::AtomRuntime;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

const CONFIG_PATH: &str = ".atom/config.toml";
const STATE_PATH: &str = ".atom/state.json";
const MEMORY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "atom", version, about = "Autonomous agent orchestration loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent on a task until it prints EXIT_LOOP_NOW.
    Run(RunArgs),
    /// Print the complexity analysis of a task as JSON.
    Analyze {
        task: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the composed system prompt.
    Compose {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Working directory of the run (also the project prompt root).
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Config file (default: `<workdir>/.atom/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Tool whose prompt fragments are composed.
    #[arg(long)]
    tool: Option<String>,
    /// Treat every task as COMPLEX.
    #[arg(long)]
    force_complex: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    task: String,
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Decomposition level: none, light, standard or aggressive.
    #[arg(long)]
    decompose: Option<DecompositionLevel>,
    /// Keep the task marker file after the run.
    #[arg(long)]
    no_cleanup: bool,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Analyze { task, common } => cmd_analyze(&task, &common),
        Command::Compose { common } => cmd_compose(&common),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut cfg = load_common_config(&args.common)?;
    if let Some(max) = args.max_iterations {
        cfg.max_iterations = max;
    }
    if let Some(level) = args.decompose {
        cfg.decomposition_level = level;
    }
    if args.no_cleanup {
        cfg.cleanup = false;
    }
    cfg.validate()?;
    logging::init(cfg.verbose);

    let workdir = &args.common.workdir;
    let rules = load_rules(cfg.rules_path.as_deref())?;
    let composer = composer_for(workdir, &cfg);
    let invoker = CliInvoker::new(
        cfg.agent_program.clone(),
        cfg.agent_timeout(),
        cfg.output_limit_bytes,
    );
    let sleeper = ThreadSleeper;
    let memory = if cfg.memory_command.is_empty() {
        None
    } else {
        Some(CommandMemoryBackend::new(
            cfg.memory_command.clone(),
            MEMORY_TIMEOUT,
            cfg.output_limit_bytes,
        )?)
    };
    let state = FileStateStore::new(workdir.join(STATE_PATH));

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("failed to set ctrl-c handler")?;

    let verbose = cfg.verbose;
    let mut runtime = AtomRuntime::new(cfg, rules, composer, &invoker, &sleeper)?
        .with_state_store(&state)
        .with_cancel(cancel)
        .with_notifier(Arc::new(move |message: &str, wait: Duration| {
            warn!(wait_secs = wait.as_secs(), "{message}");
            if verbose {
                eprintln!("{message} (retrying in {}s)", wait.as_secs());
            }
        }));
    if let Some(memory) = &memory {
        runtime = runtime.with_memory(memory);
    }

    let result = runtime.run(&args.task, workdir);
    println!("{}", serde_json::to_string_pretty(&result).context("serialize run result")?);
    Ok(exit_code(&result))
}

fn cmd_analyze(task: &str, common: &CommonArgs) -> Result<i32> {
    let cfg = load_common_config(common)?;
    logging::init(cfg.verbose);
    let rules = load_rules(cfg.rules_path.as_deref())?;
    let analyzer = TaskAnalyzer::new(rules.analyzer, cfg.decomposition_level, cfg.force_complex);
    let analysis = analyzer.analyze(task);
    println!("{}", serde_json::to_string_pretty(&analysis).context("serialize analysis")?);
    Ok(exit_codes::OK)
}

fn cmd_compose(common: &CommonArgs) -> Result<i32> {
    let cfg = load_common_config(common)?;
    logging::init(cfg.verbose);
    let prompt = composer_for(&common.workdir, &cfg).compose(cfg.tool_name.as_deref())?;
    println!("{prompt}");
    Ok(exit_codes::OK)
}

/// Load the config file and apply the flags every subcommand shares.
fn load_common_config(common: &CommonArgs) -> Result<AtomConfig> {
    let path = common
        .config
        .clone()
        .unwrap_or_else(|| common.workdir.join(CONFIG_PATH));
    let mut cfg = load_config(&path)?;
    if common.tool.is_some() {
        cfg.tool_name.clone_from(&common.tool);
    }
    if common.force_complex {
        cfg.force_complex = true;
    }
    if common.verbose {
        cfg.verbose = true;
    }
    Ok(cfg)
}

fn composer_for(workdir: &Path, cfg: &AtomConfig) -> PromptComposer {
    PromptComposer::new(&PromptSearchPaths::standard(
        workdir,
        cfg.bundled_prompts_dir.clone(),
    ))
}

fn exit_code(result: &RunResult) -> i32 {
    match result.reason {
        None if result.success => exit_codes::OK,
        Some(FailureReason::Interrupted) => exit_codes::INTERRUPTED,
        Some(FailureReason::DirectoryNotFound | FailureReason::MissingPromptFragment) => {
            exit_codes::INVALID
        }
        _ => exit_codes::FAILED,
    }
}
