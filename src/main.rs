use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swarmgraph_core::config::AppConfig;
use swarmgraph_core::types::{Architecture, Node, NodeKind};
use swarmgraph_engine::{ExecutionReport, Graph, Orchestrator};
use swarmgraph_llm::EchoInvoker;

#[derive(Parser)]
#[command(name = "swarmgraph", version, about = "Run graphs of cooperating AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "swarmgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a graph and check every invariant
    Validate {
        /// Graph snapshot (JSON)
        graph: PathBuf,
    },
    /// List the agent and team roots of a graph
    Roots {
        /// Graph snapshot (JSON)
        graph: PathBuf,
    },
    /// Execute a graph with the offline echo model
    Run {
        /// Graph snapshot (JSON)
        graph: PathBuf,
        /// The task; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        task: Vec<String>,
        /// Write the graph with states and results applied
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Simulated latency per model call
        #[arg(long, default_value = "0")]
        latency_ms: u64,
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
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "swarmgraph", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Commands::Validate { graph } => {
            let graph = load_graph(&graph)?;
            print_summary(&graph);
        }
        Commands::Roots { graph } => {
            let graph = load_graph(&graph)?;
            for (label, kind) in [("agent", NodeKind::Agent), ("team", NodeKind::Team)] {
                for root in graph.roots(kind) {
                    println!("{label}\t{}\t{}", root.id(), root.name());
                }
            }
        }
        Commands::Run {
            graph: graph_path,
            task,
            output,
            latency_ms,
        } => {
            let mut graph = load_graph(&graph_path)?;
            let task = if task.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                task.join(" ")
            };
            if task.trim().is_empty() {
                anyhow::bail!("no task given");
            }

            let report = run(&graph, &task, &config, latency_ms).await;
            println!("{}", serde_json::to_string_pretty(&report_json(&report))?);

            if let Some(path) = output {
                report.apply(&mut graph);
                std::fs::write(&path, graph.to_json_pretty()?)?;
                info!(path = %path.display(), "Wrote graph with results");
            }
            if !report.succeeded() {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(Graph::from_json(&json)?)
}

fn print_summary(graph: &Graph) {
    let agents = graph.nodes().filter(|n| n.kind() == NodeKind::Agent).count();
    let teams: Vec<_> = graph.nodes().filter_map(Node::as_team).collect();
    let members: usize = teams.iter().map(|t| t.members.len()).sum();
    println!(
        "ok: {} agents, {} teams ({} members), {} edges",
        agents,
        teams.len(),
        members,
        graph.edges().len()
    );

    // Workers that will be skipped at run time
    for team in teams.iter().filter(|t| t.architecture == Architecture::Hierarchical) {
        for worker in team.workers() {
            let has_boss = team
                .bosses()
                .any(|b| b.cluster_id.is_some() && b.cluster_id == worker.cluster_id);
            if !has_boss {
                warn!(team_id = %team.id, worker_id = %worker.id, "Worker has no boss in its cluster");
                println!("warning: worker {} in team {} has no boss", worker.id, team.id);
            }
        }
    }
}

async fn run(graph: &Graph, task: &str, config: &AppConfig, latency_ms: u64) -> ExecutionReport {
    let echo = EchoInvoker::new().with_latency(Duration::from_millis(latency_ms));
    let invoker = swarmgraph_llm::with_resilience(Arc::new(echo), config);
    let mut orchestrator = Orchestrator::from_config(invoker, &config.engine);
    orchestrator.on_state_change(|id, state| eprintln!("  {id} -> {state:?}"));

    let ctx = orchestrator.new_context();
    let cancel = ctx.cancel_token();

    // Ctrl-C stops new dispatch; in-flight calls finish
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        cancel.cancel();
    });

    orchestrator.execute_with(graph, task, &ctx).await
}

fn report_json(report: &ExecutionReport) -> serde_json::Value {
    let errors: serde_json::Map<String, serde_json::Value> = report
        .errors
        .iter()
        .map(|(id, e)| (id.to_string(), e.to_string().into()))
        .collect();
    let warnings: Vec<String> = report.warnings.iter().map(|w| w.to_string()).collect();

    serde_json::json!({
        "run_id": report.run_id,
        "cancelled": report.cancelled,
        "elapsed_ms": report.elapsed_ms,
        "results": report.results,
        "errors": errors,
        "warnings": warnings,
        "states": report.states,
    })
}
