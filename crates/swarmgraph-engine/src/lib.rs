pub mod agent;
pub mod cluster;
pub mod graph;
pub mod orchestrator;
pub mod prompt;
pub mod run_context;
pub mod team;

pub use agent::AgentExecutor;
pub use cluster::ClusterPolicy;
pub use graph::{would_cycle, Graph, GraphSnapshot};
pub use orchestrator::{ExecutionReport, Orchestrator};
pub use prompt::PromptBuilder;
pub use run_context::{NodeOutcome, RunContext, StateObserver};
pub use team::{TeamExecutor, TeamOutcome};
