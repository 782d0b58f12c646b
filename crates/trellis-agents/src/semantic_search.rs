use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::types::Hit;

use trellis_retrieval::Retriever;

use crate::{Agent, AgentInput, AgentResult};

const DEFAULT_TOP_K: usize = 5;
/// Candidate multiplier when reranking is on.
const RERANK_FACTOR: usize = 3;

/// Retrieval agent: runs a semantic search over the active corpus and
/// attaches relevance-ranked snippets to the context.
pub struct SemanticSearchAgent {
    retriever: Arc<Retriever>,
}

impl SemanticSearchAgent {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

impl Agent for SemanticSearchAgent {
    fn model_label_override(&self) -> Option<&'static str> {
        Some("embedding")
    }

    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let top_k = input.setting_usize("topK", DEFAULT_TOP_K);
            let rerank = input.setting_bool("rerank", true);
            let corpus = self.retriever.catalog().active();

            let hits: Vec<Hit> = self
                .retriever
                .retrieve(
                    &corpus,
                    &input.user_message,
                    top_k,
                    rerank,
                    top_k * RERANK_FACTOR,
                )
                .await?;

            debug!(corpus, hits = hits.len(), "Semantic search complete");

            let results = serde_json::to_value(&hits)?;
            let docs: Vec<serde_json::Value> = hits
                .iter()
                .map(|h| serde_json::json!({"title": h.title, "source": h.source, "score": h.score}))
                .collect();

            let content = if hits.is_empty() {
                format!("No matching documents in the '{corpus}' knowledge base.")
            } else {
                hits.iter()
                    .map(|h| format!("{} (score {:.2})", h.title, h.score))
                    .collect::<Vec<_>>()
                    .join("\n")
            };

            Ok(AgentResult::new("search", content)
                .with_metadata("results_count", serde_json::json!(hits.len()))
                .with_metadata("knowledge_base", serde_json::json!(corpus))
                .with_update(keys::SEMANTIC_RESULTS, results)
                .with_update(
                    keys::TOOL_OUTPUTS,
                    serde_json::json!({ "docs": docs }),
                ))
        })
    }
}
