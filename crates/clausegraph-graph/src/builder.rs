use clausegraph_core::{single_line, ClauseGraphError, ClauseNode, Label, Result, StructuralEdge};
use clausegraph_vector::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::graph::TrainingGraph;

/// One clause as exported by the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseRecord {
    #[serde(default = "unknown_index")]
    pub clause_index: i64,
    #[serde(default)]
    pub text: String,
}

fn unknown_index() -> i64 {
    -1
}

/// A contract exported as `{"clauses": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDocument {
    #[serde(skip)]
    pub document_id: String,
    #[serde(default)]
    pub clauses: Vec<ClauseRecord>,
}

impl ContractDocument {
    pub fn new(document_id: impl Into<String>, clauses: Vec<ClauseRecord>) -> Self {
        Self {
            document_id: document_id.into(),
            clauses,
        }
    }

    /// Every `*.json` file in `dir`, sorted by file name; the file name becomes the document id.
    pub fn load_dir(dir: &Path) -> Result<Vec<ContractDocument>> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = std::fs::read(&path)?;
            let mut document: ContractDocument = serde_json::from_slice(&bytes).map_err(|e| {
                ClauseGraphError::DataIntegrity(format!("{}: {}", path.display(), e))
            })?;
            document.document_id = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push(document);
        }
        Ok(documents)
    }
}

/// Builds a fresh training graph: one node per clause, sequential structural edges within each
/// document, every label UNLABELED.
pub struct DatasetBuilder<P> {
    provider: P,
}

impl<P: EmbeddingProvider> DatasetBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn build(&self, documents: &[ContractDocument]) -> Result<TrainingGraph> {
        let start = Instant::now();
        let dimension = self.provider.embedding_dimension();
        let mut nodes: Vec<ClauseNode> = Vec::new();
        let mut edges: Vec<StructuralEdge> = Vec::new();

        for document in documents {
            if document.clauses.is_empty() {
                warn!("{} has no clauses, skipping", document.document_id);
                continue;
            }

            let texts: Vec<String> = document
                .clauses
                .iter()
                .map(|c| single_line(&c.text))
                .collect();
            let embeddings = self.provider.embed_batch(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(ClauseGraphError::ExternalService(format!(
                    "{} returned {} embeddings for {} clauses",
                    self.provider.provider_name(),
                    embeddings.len(),
                    texts.len()
                )));
            }

            let mut previous = None;
            for ((clause, text), embedding) in document.clauses.iter().zip(texts).zip(embeddings) {
                if embedding.len() != dimension {
                    return Err(ClauseGraphError::Configuration(format!(
                        "provider {} produced dimension {}, expected {}",
                        self.provider.provider_name(),
                        embedding.len(),
                        dimension
                    )));
                }
                let node_id = nodes.len();
                if let Some(prev) = previous {
                    edges.push(StructuralEdge {
                        src: prev,
                        dst: node_id,
                    });
                }
                nodes.push(ClauseNode {
                    node_id,
                    source_document_id: document.document_id.clone(),
                    sequence_index: clause.clause_index,
                    text,
                    embedding,
                });
                previous = Some(node_id);
            }
            debug!(
                "Added {} clauses from {}",
                document.clauses.len(),
                document.document_id
            );
        }

        let labels = vec![Label::Unlabeled; nodes.len()];
        let graph = TrainingGraph::from_parts(nodes, edges, labels)?;
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            documents = documents.len(),
            "Built training graph in {:?}",
            start.elapsed()
        );
        Ok(graph)
    }
}
