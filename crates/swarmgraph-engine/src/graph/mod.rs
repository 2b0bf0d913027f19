//! Graph store: agents, teams, and the typed dependency edges between them.
//!
//! Agent→Agent edges (`AgentLink`) and Team→Team edges (`TeamLink`) form two
//! independent DAGs. `Graph` validates every mutation; `cycle::would_cycle`
//! is the pure check run before an edge is admitted.

pub mod cycle;
pub mod store;

pub use cycle::would_cycle;
pub use store::{Graph, GraphSnapshot};
