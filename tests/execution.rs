use std::sync::Arc;
use std::time::Duration;

use swarmgraph_core::config::{AppConfig, EngineConfig, TeamFailurePolicy};
use swarmgraph_core::error::SwarmError;
use swarmgraph_core::types::{Architecture, NodeState, SwarmEvent, Team};
use swarmgraph_engine::{Graph, Orchestrator};
use swarmgraph_llm::{EchoInvoker, RetryingInvoker};
use swarmgraph_test_utils::{agent, boss, worker, MockInvoker};

/// Two agent chains feeding nothing, plus three chained teams of every
/// architecture.
fn swarm() -> Graph {
    let mut graph = Graph::new();
    for id in ["scout", "analyst", "critic", "writer"] {
        graph.add_node(agent(id)).unwrap();
    }
    graph.add_edge("scout", "analyst").unwrap();
    graph.add_edge("scout", "critic").unwrap();
    graph.add_edge("analyst", "writer").unwrap();
    graph.add_edge("critic", "writer").unwrap();

    graph
        .add_node(
            Team::new("research", "Research", Architecture::Hierarchical)
                .with_member(boss("lead", "c1"))
                .with_member(worker("reader", "c1"))
                .with_member(worker("notes", "c1")),
        )
        .unwrap();
    graph
        .add_node(
            Team::new("review", "Review", Architecture::Concurrent)
                .with_member(agent("r1"))
                .with_member(agent("r2")),
        )
        .unwrap();
    graph
        .add_node(
            Team::new("publish", "Publish", Architecture::Sequential)
                .with_member(agent("editor"))
                .with_member(agent("typesetter")),
        )
        .unwrap();
    graph.add_edge("research", "review").unwrap();
    graph.add_edge("review", "publish").unwrap();
    graph
}

#[tokio::test]
async fn test_full_swarm_runs_every_node_once() {
    let mock = Arc::new(MockInvoker::new().with_delay("analyst", Duration::from_millis(15)));
    let graph = swarm();

    let report = Orchestrator::new(mock.clone()).execute(&graph, "write a report").await;

    assert!(report.succeeded(), "errors: {:?}", report.errors);
    // 4 agents + 3 teams + 7 members
    assert_eq!(report.results.len(), 14);
    assert_eq!(mock.call_count(), 11);
    assert_eq!(mock.prompts_for("writer").len(), 1);
    assert!(report.states.values().all(|s| *s == NodeState::Done));

    let publish = &mock.prompts_for("editor")[0];
    assert!(publish.contains("Review: R1: r1-out"));
    let typesetter = &mock.prompts_for("typesetter")[0];
    assert!(typesetter.contains("EDITOR: editor-out"));
}

#[tokio::test]
async fn test_failures_stay_on_their_branch() {
    let mock = Arc::new(MockInvoker::new().fail_model("critic").fail_model("r1").fail_model("r2"));
    let graph = swarm();

    let report = Orchestrator::new(mock.clone()).execute(&graph, "write a report").await;

    assert!(!report.succeeded());
    // writer still has analyst's output
    assert_eq!(report.results["writer"], "writer-out");
    assert!(mock.prompts_for("writer")[0].contains("CRITIC: [upstream failed"));

    // review fails outright, publish never runs
    assert!(matches!(report.errors["review"], SwarmError::TeamFailed { .. }));
    assert!(matches!(report.errors["publish"], SwarmError::UpstreamFailed { .. }));
    assert!(mock.prompts_for("editor").is_empty());
    assert_eq!(report.states["publish"], NodeState::Errored);
    assert_eq!(report.states["editor"], NodeState::Idle);

    // research is unaffected
    assert!(report.results.contains_key("research"));
}

#[tokio::test]
async fn test_all_success_policy_from_config() {
    let mock = Arc::new(MockInvoker::new().fail_model("r2"));
    let config = EngineConfig {
        team_failure_policy: TeamFailurePolicy::AllSuccess,
        ..EngineConfig::default()
    };
    let graph = swarm();

    let report = Orchestrator::from_config(mock, &config)
        .execute(&graph, "write a report")
        .await;

    assert_eq!(report.results["r1"], "r1-out");
    assert!(matches!(report.errors["review"], SwarmError::TeamFailed { .. }));
}

#[tokio::test]
async fn test_orphan_worker_is_reported() {
    let mock = Arc::new(MockInvoker::new());
    let mut graph = Graph::new();
    graph
        .add_node(
            Team::new("t", "T", Architecture::Hierarchical)
                .with_member(boss("lead", "c1"))
                .with_member(worker("stray", "c2")),
        )
        .unwrap();
    let orchestrator = Orchestrator::new(mock.clone());
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator.execute(&graph, "task").await;

    assert!(report.succeeded());
    assert_eq!(report.warnings.len(), 1);
    assert!(mock.prompts_for("stray").is_empty());

    let mut saw_orphan = false;
    while let Ok(event) = events.try_recv() {
        if let SwarmEvent::OrphanWorker { worker_id, .. } = event {
            assert_eq!(worker_id.as_str(), "stray");
            saw_orphan = true;
        }
    }
    assert!(saw_orphan);
}

#[tokio::test]
async fn test_retrying_invoker_recovers_flaky_model() {
    let mock = Arc::new(MockInvoker::new().fail_times("scout", 1));
    let config = AppConfig::from_toml("[retry]\nmax_retries = 2\ninitial_backoff_ms = 1\nmax_backoff_ms = 2\n").unwrap();
    let invoker = Arc::new(RetryingInvoker::from_config(mock.clone(), &config));
    let graph = swarm();

    let report = Orchestrator::new(invoker).execute(&graph, "task").await;

    assert!(report.succeeded());
    assert_eq!(mock.prompts_for("scout").len(), 2);
}

#[tokio::test]
async fn test_dry_run_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, swarm().to_json_pretty().unwrap()).unwrap();

    let mut graph = Graph::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let report = Orchestrator::new(Arc::new(EchoInvoker::new()))
        .execute(&graph, "write a report")
        .await;
    assert!(report.succeeded());
    assert_eq!(report.results["scout"], "[scout] write a report");

    report.apply(&mut graph);
    std::fs::write(&path, graph.to_json_pretty().unwrap()).unwrap();
    let restored = Graph::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let publish = restored.team("publish").unwrap();
    assert_eq!(publish.state, NodeState::Done);
    assert!(publish.aggregate_result.as_deref().unwrap().starts_with("EDITOR: "));
    assert_eq!(restored.agent("writer").unwrap().state, NodeState::Done);
}
