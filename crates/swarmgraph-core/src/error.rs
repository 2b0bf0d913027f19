use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    // Authoring errors
    #[error("Invalid edge {source_id} -> {target_id}: {reason}")]
    InvalidEdgeKind {
        source_id: String,
        target_id: String,
        reason: String,
    },

    #[error("Edge {source_id} -> {target_id} would create a cycle")]
    CycleDetected { source_id: String, target_id: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge already exists: {source_id} -> {target_id}")]
    DuplicateEdge { source_id: String, target_id: String },

    #[error("Edge not found: {source_id} -> {target_id}")]
    EdgeNotFound { source_id: String, target_id: String },

    #[error("Invalid team membership: {0}")]
    InvalidMembership(String),

    // Model errors
    #[error("Model unavailable: {model}: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Model timeout after {timeout_ms}ms: {model}")]
    ModelTimeout { model: String, timeout_ms: u64 },

    // Execution errors
    #[error("Upstream failed: {}", .sources.join(", "))]
    UpstreamFailed { sources: Vec<String> },

    #[error("Worker {worker} in team {team} has no boss for cluster {cluster}")]
    OrphanWorker {
        team: String,
        worker: String,
        cluster: String,
    },

    #[error("Team {team} failed: {message}")]
    TeamFailed { team: String, message: String },

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwarmError {
    /// Whether this is a runtime model failure (as opposed to an authoring
    /// or configuration error).
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            SwarmError::ModelUnavailable { .. } | SwarmError::ModelTimeout { .. }
        )
    }

    /// Whether the error was raised while editing the graph.
    pub fn is_authoring_error(&self) -> bool {
        matches!(
            self,
            SwarmError::InvalidEdgeKind { .. }
                | SwarmError::CycleDetected { .. }
                | SwarmError::NodeNotFound(_)
                | SwarmError::DuplicateNode(_)
                | SwarmError::DuplicateEdge { .. }
                | SwarmError::EdgeNotFound { .. }
                | SwarmError::InvalidMembership(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
