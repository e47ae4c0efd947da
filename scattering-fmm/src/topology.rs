//! Static problem decomposition: which interactions are local, who owns which
//! scatterer, and which ranks need to talk to each other.
mod graph;
mod interactions;
mod partition;
pub mod types;

pub use graph::graph_edges;
pub use interactions::classify;
pub use partition::partition;
pub use types::{CommunicationGraph, Distribution, InteractionMatrix};
