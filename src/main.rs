use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use autonomy_orchestrator::config::{self, OrchestratorConfig};
use autonomy_orchestrator::coordinator::{Coordinator, HaltReason};
use autonomy_orchestrator::llm::HttpLlmClient;
use autonomy_orchestrator::llm::LlmClient;
use autonomy_orchestrator::lock;
use autonomy_orchestrator::log::parse_log_level;
use autonomy_orchestrator::objectives::ObjectiveManager;
use autonomy_orchestrator::store::StateStore;
use autonomy_orchestrator::tools::ToolRegistry;
use autonomy_orchestrator::{bus, log_error, log_info, signals};

#[derive(Parser)]
#[command(name = "autonomy", about = "Autonomous software-development pipeline orchestrator")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/autonomy.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the project's MASTER_PLAN.md and state
    Run {
        /// Discard persisted state and pipeline_run_id before starting
        #[arg(long)]
        fresh: bool,
        /// Select phases and print decisions without invoking the LLM or
        /// touching the workspace
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of phase executions this invocation may perform
        #[arg(long)]
        cap: Option<u32>,
    },
    /// Print the current state summary (completion %, maturity, active objective)
    Status,
    /// Print the objective hierarchy and each objective's health
    Objectives,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = parse_log_level(&cli.log_level).map(autonomy_orchestrator::log::set_log_level) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let root = cli.root.clone();
    let exit_code = match cli.command {
        Commands::Run { fresh, dry_run, cap } => handle_run(&root, cli.config.as_deref(), fresh, dry_run, cap).await,
        Commands::Status => handle_status(&root, cli.config.as_deref()).map(|()| 0),
        Commands::Objectives => handle_objectives(&root, cli.config.as_deref()).map(|()| 0),
    };

    match exit_code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log_error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load(root: &Path, config_path: Option<&Path>) -> Result<OrchestratorConfig, String> {
    config::load_config_from(config_path, root)
}

fn state_path(root: &Path, config: &OrchestratorConfig) -> PathBuf {
    root.join(&config.project.state_path)
}

async fn handle_run(
    root: &Path,
    config_path: Option<&Path>,
    fresh: bool,
    dry_run: bool,
    cap: Option<u32>,
) -> Result<i32, String> {
    let cancel = CancellationToken::new();
    signals::install(cancel.clone())?;

    log_info!("--- Autonomy Orchestrator ---");

    let config = load(root, config_path)?;
    let runtime_dir = autonomy_orchestrator::store::state_dir(&state_path(root, &config)).to_path_buf();
    let _guard = lock::try_acquire(&runtime_dir)?;

    let path = state_path(root, &config);
    if fresh && path.exists() {
        std::fs::remove_file(&path).map_err(|e| format!("Failed to remove {}: {}", path.display(), e))?;
    }

    let store = StateStore::new(path);
    let mut state = store.load()?;

    let mut objectives = load_objectives(root);
    objectives.merge_from_state(&state);

    if dry_run {
        let decision = autonomy_orchestrator::coordinator::decide_next_action(&state, &objectives, &config.lifecycle);
        println!(
            "would run phase '{}' (task={:?}): {}",
            decision.phase, decision.task_id, decision.reason
        );
        return Ok(0);
    }

    let bus = bus::spawn_message_bus();
    let tools = Arc::new(ToolRegistry::new(root));
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(config.agent.endpoint.clone()));

    let mut coordinator = Coordinator::new(store, bus, llm, tools, objectives, config);
    let summary = coordinator.run(cancel, cap).await?;

    log_info!(
        "Halted after {} phase execution(s): {:?}",
        summary.iterations,
        summary.halt_reason
    );

    state = coordinator.store.load()?;
    println!(
        "completion: {:.1}% ({:?})",
        state.completion_percentage(),
        state.project_maturity()
    );

    Ok(match summary.halt_reason {
        HaltReason::PipelineComplete => 0,
        HaltReason::CapReached => 0,
        HaltReason::ShutdownRequested => 2,
        HaltReason::AskUser => 3,
        HaltReason::CircuitBreakerTripped => 1,
        HaltReason::StateCorrupted => 1,
    })
}

fn handle_status(root: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let config = load(root, config_path)?;
    let store = StateStore::new(state_path(root, &config));
    let state = store.load()?;

    println!("pipeline_run_id: {}", state.pipeline_run_id);
    println!("version: {}", state.version);
    println!("tasks: {}", state.tasks.len());
    println!("completion: {:.1}%", state.completion_percentage());
    println!("maturity: {:?}", state.project_maturity());
    println!("last phases: {:?}", state.phase_history.iter().rev().take(5).collect::<Vec<_>>());
    Ok(())
}

fn handle_objectives(root: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let config = load(root, config_path)?;
    let store = StateStore::new(state_path(root, &config));
    let state = store.load()?;

    let mut objectives = load_objectives(root);
    objectives.merge_from_state(&state);

    for (level, by_id) in &objectives.objectives {
        for objective in by_id.values() {
            println!(
                "[{}] {} ({:?}) — {:.1}% complete, {:?}",
                level,
                objective.title,
                objective.status,
                objective.completion_percentage,
                objectives.health(objective)
            );
        }
    }
    Ok(())
}

fn load_objectives(root: &Path) -> ObjectiveManager {
    let read = |name: &str| std::fs::read_to_string(root.join(name)).unwrap_or_default();
    ObjectiveManager::load_from_markdown(
        &read("PRIMARY_OBJECTIVES.md"),
        &read("SECONDARY_OBJECTIVES.md"),
        &read("TERTIARY_OBJECTIVES.md"),
    )
}
