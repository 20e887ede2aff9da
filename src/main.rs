use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;

use delve::agent::scripted::Script;
use delve::config::Config;
use delve::control::{ControlRequest, ControlResponse, DefaultResponder, RequestKind, Responder};
use delve::orchestration::{ConfigSnapshot, ConfigValue, ParallelOrchestrator, Task};
use delve::{util, Agent, Error, Result};

/// Delve - suspendable agent loops with delegation and parallel orchestration
#[derive(Parser, Debug)]
#[command(name = "delve")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    DELVE_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.delve/delve.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file to use instead of ~/.delve/delve.toml
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Replay a scripted session, answering control requests on stdin
    Run {
        /// Script file (TOML)
        script: PathBuf,

        /// Answer every control request with its default
        #[arg(long)]
        auto: bool,
    },

    /// Run several scripts as isolated parallel units
    Parallel {
        /// Script files (TOML)
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// Maximum units running at once (defaults to config)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    delve::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run { script, auto } => run_script(&config, &script, auto).await,
        Command::Parallel { scripts, jobs } => run_parallel(&config, scripts, jobs).await,
    }
}

/// Replay one script as a driven computation.
async fn run_script(config: &Config, path: &Path, auto: bool) -> Result<()> {
    info!(script = %path.display(), auto, "run command");
    let script = Script::load(path)?;
    let agent = script.build_agent("main", config);
    let computation = agent.start(script.task.clone());
    let result = if auto {
        computation.drive_with(&DefaultResponder).await?
    } else {
        computation.drive_with(&StdinResponder).await?
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Run every script as its own unit and print the aggregate.
async fn run_parallel(config: &Config, scripts: Vec<PathBuf>, jobs: Option<usize>) -> Result<()> {
    info!(scripts = scripts.len(), "parallel command");
    let tasks = scripts
        .iter()
        .map(|path| -> Result<Task> {
            let script = Script::load(path)?;
            let snapshot = ConfigSnapshot::from_pairs([(
                "script",
                ConfigValue::Text(path.display().to_string()),
            )]);
            Ok(Task::new(script.task, snapshot))
        })
        .collect::<Result<Vec<_>>>()?;

    let unit_config = config.clone();
    let factory = move |task: &Task| -> Result<Agent> {
        let path = task
            .config()
            .get("script")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| Error::Validation("task has no script".to_string()))?;
        let script = Script::load(Path::new(path))?;
        Ok(script.build_agent(&format!("unit-{}", task.id().short()), &unit_config))
    };

    let mut orchestrator = ParallelOrchestrator::from_config(&config.orchestrator, factory);
    if let Some(jobs) = jobs {
        orchestrator = orchestrator.with_max_concurrency(jobs);
    }
    let result = orchestrator.run_parallel(tasks).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Answers control requests by prompting on the terminal.
///
/// An empty line accepts the request's default.
struct StdinResponder;

#[async_trait]
impl Responder for StdinResponder {
    async fn respond(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let prompt = request.render();
        let line = util::blocking(move || {
            let mut stdout = io::stdout();
            writeln!(stdout, "\n{}", prompt)?;
            write!(stdout, "> ")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await?;
        Ok(interpret_answer(request, line.trim()))
    }
}

fn interpret_answer(request: &ControlRequest, answer: &str) -> ControlResponse {
    if answer.is_empty() {
        return request.default_response();
    }
    match request.innermost().kind() {
        RequestKind::ConfirmAction { .. } => match request.answer(answer).approved() {
            Some(true) => request.approve(),
            Some(false) => request.deny(),
            None => request.default_response(),
        },
        RequestKind::AskUser { .. } | RequestKind::SubAgentQuery { .. } => request.answer(answer),
    }
}
