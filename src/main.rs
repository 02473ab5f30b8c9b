use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use opflow_core::config::{AppConfig, DEFAULT_CONFIG_FILE};
use opflow_core::event::{EventBus, WorkflowEvent};
use opflow_core::traits::{LlmClient, PlanProducer};
use opflow_core::types::Plan;
use opflow_operators::{OperatorDeps, OperatorRegistry, SqliteExecutor};
use opflow_planner::LlmPlanner;
use opflow_workflow::{Edge, EngineOptions, WorkflowBuilder, WorkflowEngine};

#[derive(Parser)]
#[command(name = "opflow", version, about = "Natural-language analysis over operator workflows")]
struct Cli {
    /// Path to config file [default: opflow.toml]
    #[arg(short, long, env = "OPFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered operators
    Operators {
        /// Only show operators whose name or description matches
        #[arg(long)]
        search: Option<String>,
    },
    /// Export the operator catalog as JSON
    Catalog {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the plan the LLM produces for a query
    Plan {
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Build a workflow from a plan file and print its graph
    Graph {
        #[arg(long)]
        plan: PathBuf,
        /// JSON edge list; defaults to a linear chain
        #[arg(long)]
        edges: Option<PathBuf>,
    },
    /// Plan, build and execute a query
    Run {
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Execute a plan file without calling the planner
    RunPlan {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, default_value = "")]
        query: String,
        /// JSON edge list; defaults to a linear chain
        #[arg(long)]
        edges: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries plans and state JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opflow=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "opflow", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    if let Commands::Config = &cli.command {
        let mut shown = config.clone();
        shown.model = shown.model.redacted();
        println!("{}", toml::to_string_pretty(&shown)?);
        return Ok(());
    }

    let llm: Arc<dyn LlmClient> = Arc::from(opflow_llm::create_client(&config.model));
    let registry = build_registry(&config, llm.clone())?;

    match cli.command {
        Commands::Operators { search } => {
            let operators = match search {
                Some(q) => registry.search(&q),
                None => registry.descriptors(),
            };
            for op in operators {
                println!("{:<20} {}", op.name, op.description);
            }
        }
        Commands::Catalog { output } => {
            registry.export_catalog(&output)?;
            info!(path = %output.display(), operators = registry.len(), "Catalog exported");
        }
        Commands::Plan { query } => {
            let query = read_query(query)?;
            let plan = LlmPlanner::from_config(llm, &config)
                .produce(&query, &registry.descriptors())
                .await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Graph { plan, edges } => {
            let plan = read_plan(&plan)?;
            let edges = edges.as_deref().map(read_edges).transpose()?;
            let workflow = WorkflowBuilder::new(registry).build_from_plan("", &plan, edges.as_deref())?;
            print!("{}", workflow.graph.render());
        }
        Commands::Run { query } => {
            let query = read_query(query)?;
            let plan = LlmPlanner::from_config(llm, &config)
                .produce(&query, &registry.descriptors())
                .await?;
            for (position, name) in registry.unresolved(&plan) {
                eprintln!("Plan step {} uses unknown operator '{}'", position + 1, name);
            }
            if !execute_plan(&config, registry, &query, &plan, None).await? {
                std::process::exit(1);
            }
        }
        Commands::RunPlan { plan, query, edges } => {
            let plan = read_plan(&plan)?;
            let edges = edges.as_deref().map(read_edges).transpose()?;
            if !execute_plan(&config, registry, &query, &plan, edges).await? {
                std::process::exit(1);
            }
        }
        Commands::Config | Commands::Completions { .. } => unreachable!("handled before registry setup"),
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    if let Some(config) = AppConfig::load_from(path, explicit.is_some())? {
        return Ok(config);
    }

    warn!(path = %path.display(), "No config file found, using defaults and environment");
    eprintln!("See opflow.toml.example for reference.");
    Ok(AppConfig::from_env())
}

fn build_registry(config: &AppConfig, llm: Arc<dyn LlmClient>) -> anyhow::Result<Arc<OperatorRegistry>> {
    let mut deps = OperatorDeps::new(llm, config.model.clone())
        .with_schema(config.planner.schema.clone())
        .with_max_rows(config.datasource.max_rows);
    if let Some(path) = &config.datasource.sqlite_path {
        deps = deps.with_datasource(Arc::new(SqliteExecutor::new(path.clone())));
    } else {
        warn!("No [datasource] sqlite_path configured; the sql operator will fail");
    }
    Ok(Arc::new(OperatorRegistry::with_builtins(deps)?))
}

/// Join the query words, reading stdin when none were given.
fn read_query(words: Vec<String>) -> anyhow::Result<String> {
    let query = words.join(" ");
    if !query.trim().is_empty() {
        return Ok(query);
    }
    let input = io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n");
    if input.trim().is_empty() {
        anyhow::bail!("no query given");
    }
    Ok(input)
}

fn read_plan(path: &Path) -> anyhow::Result<Plan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing plan {}", path.display()))
}

fn read_edges(path: &Path) -> anyhow::Result<Vec<Edge>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading edges {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing edges {}", path.display()))
}

/// Build and run `plan`, printing progress to stderr and the final state to
/// stdout. Returns whether the run finished without errors.
async fn execute_plan(
    config: &AppConfig,
    registry: Arc<OperatorRegistry>,
    query: &str,
    plan: &Plan,
    edges: Option<Vec<Edge>>,
) -> anyhow::Result<bool> {
    let workflow = WorkflowBuilder::new(registry).build_from_plan(query, plan, edges.as_deref())?;
    eprint!("{}", workflow.graph.render());

    let event_bus = Arc::new(EventBus::default());
    let progress = tokio::spawn(print_progress(event_bus.subscribe()));
    let engine = WorkflowEngine::new(EngineOptions::from(&config.engine)).with_events(event_bus);

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling workflow");
                cancel.cancel();
            }
        })
    };

    let report = engine.execute(&workflow.graph, workflow.state, &cancel).await;
    interrupt.abort();
    // Dropping the engine closes the bus so the progress task drains and exits.
    drop(engine);
    let _ = progress.await;

    println!("{}", serde_json::to_string_pretty(&report.state)?);
    for (node_id, failure) in report.state.errors() {
        eprintln!("[{}] {} {:?}: {}", node_id, failure.operator, failure.kind, failure.message);
    }
    eprintln!(
        "Finished in {} ms: {}",
        report.total_elapsed_ms,
        if report.succeeded { "ok" } else { "failed" }
    );

    Ok(!report.state.has_errors())
}

async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<WorkflowEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event {
                WorkflowEvent::NodeStarted { node_id, operator, .. } => {
                    eprintln!("▶ {} ({})", node_id, operator);
                }
                WorkflowEvent::NodeSucceeded { node_id, elapsed_ms, .. } => {
                    eprintln!("✓ {} [{} ms]", node_id, elapsed_ms);
                }
                WorkflowEvent::NodeFailed { node_id, error, .. } => {
                    eprintln!("✗ {}: {}", node_id, error);
                }
                WorkflowEvent::NodeSkipped { node_id, .. } => eprintln!("- {} skipped", node_id),
                WorkflowEvent::NodeCancelled { node_id, .. } => eprintln!("- {} cancelled", node_id),
                WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunFinished { .. } => {}
            },
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Progress output lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
