//! Neo4j driver. One batch is one transaction; nodes merge on id, edges
//! merge on (source, target, type).

use async_trait::async_trait;
use codegraph_core::PipelineError;
use neo4rs::{query, Graph};
use tracing::info;

use crate::store::{GraphEdge, GraphNode, GraphStore};

pub struct Neo4jStore {
    graph: Graph,
}

fn graph_err(e: neo4rs::Error) -> PipelineError {
    PipelineError::Graph(e.to_string())
}

/// Labels and relationship types are interpolated into Cypher (they cannot
/// be parameterized), so they must be plain identifiers.
fn check_identifier(s: &str) -> Result<(), PipelineError> {
    let ok = !s.is_empty()
        && s.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(PipelineError::Graph(format!("invalid graph identifier '{}'", s)))
    }
}

impl Neo4jStore {
    /// Connect and ensure the unique index on node ids, which keeps the
    /// merge upserts in the linear regime.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, PipelineError> {
        let graph = Graph::new(uri, user, password).await.map_err(graph_err)?;
        graph
            .run(query(
                "CREATE CONSTRAINT poi_id IF NOT EXISTS FOR (p:Poi) REQUIRE p.id IS UNIQUE",
            ))
            .await
            .map_err(graph_err)?;
        info!("connected to neo4j at {}", uri);
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn batch_upsert(
        &self,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
    ) -> Result<(), PipelineError> {
        let mut txn = self.graph.start_txn().await.map_err(graph_err)?;

        for node in nodes {
            check_identifier(&node.label)?;
            let cypher = format!(
                "MERGE (p:Poi {{id: $id}})
                 ON CREATE SET p:{label}, p.name = $name, p.qualified_name = $qualified_name,
                               p.file_path = $file_path, p.line = $line",
                label = node.label
            );
            txn.run(
                query(&cypher)
                    .param("id", node.id)
                    .param("name", node.name.as_str())
                    .param("qualified_name", node.qualified_name.as_str())
                    .param("file_path", node.file_path.as_str())
                    .param("line", node.line),
            )
            .await
            .map_err(graph_err)?;
        }

        for edge in edges {
            check_identifier(&edge.kind)?;
            let cypher = format!(
                "MATCH (a:Poi {{id: $source}}), (b:Poi {{id: $target}})
                 MERGE (a)-[r:{kind}]->(b)
                 SET r.confidence = $confidence",
                kind = edge.kind
            );
            txn.run(
                query(&cypher)
                    .param("source", edge.source_id)
                    .param("target", edge.target_id)
                    .param("confidence", edge.confidence),
            )
            .await
            .map_err(graph_err)?;
        }

        txn.commit().await.map_err(graph_err)
    }

    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_check_rejects_injection() {
        check_identifier("Function").unwrap();
        check_identifier("CALLS").unwrap();
        check_identifier("_Internal2").unwrap();
        assert!(check_identifier("").is_err());
        assert!(check_identifier("CALLS]->(x) DETACH DELETE x //").is_err());
        assert!(check_identifier("2fast").is_err());
    }
}
