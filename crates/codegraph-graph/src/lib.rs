//! Graph boundary: the `GraphStore` capability trait, a Neo4j driver, an
//! in-memory driver for tests, and the streaming builder that moves
//! VALIDATED relationships into the external graph.

mod builder;
mod memory;
mod neo4j;
mod store;

pub use builder::{GraphBuildReport, GraphBuilder};
pub use memory::MemoryGraph;
pub use neo4j::Neo4jStore;
pub use store::{GraphEdge, GraphNode, GraphStore};
