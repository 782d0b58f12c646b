use std::sync::Arc;

use tracing::{debug, warn};

use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions, Hit, ModelClass};

use crate::cache::EmbeddingStore;
use crate::corpus::CorpusCatalog;
use crate::is_zero_vector;

/// Top-K semantic retrieval with optional LLM reranking.
pub struct Retriever {
    store: Arc<dyn EmbeddingStore>,
    catalog: Arc<CorpusCatalog>,
    gateway: Arc<dyn ModelGateway>,
    snippet_chars: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        catalog: Arc<CorpusCatalog>,
        gateway: Arc<dyn ModelGateway>,
        snippet_chars: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            gateway,
            snippet_chars,
        }
    }

    pub fn catalog(&self) -> &Arc<CorpusCatalog> {
        &self.catalog
    }

    pub async fn count(&self, corpus: &str) -> Result<usize> {
        self.store.count(corpus).await
    }

    /// Retrieve the top `k` hits for a query.
    ///
    /// When `rerank` is set, `rerank_k` candidates are fetched and a small
    /// model proposes a permutation; unparseable or short permutations fall
    /// back to the cosine order. Scores stay raw cosine values in [-1, 1].
    pub async fn retrieve(
        &self,
        corpus: &str,
        query: &str,
        k: usize,
        rerank: bool,
        rerank_k: usize,
    ) -> Result<Vec<Hit>> {
        if k == 0 || self.store.count(corpus).await? == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.gateway.embed(vec![query.to_string()]).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };
        if is_zero_vector(&query_vector) {
            debug!(corpus, "Query embedded to a zero vector, no candidates");
            return Ok(Vec::new());
        }

        let fetch = if rerank { rerank_k.max(k) } else { k };
        let mut candidates = self.store.search(corpus, &query_vector, fetch).await?;

        if rerank && candidates.len() > 1 {
            candidates = self.rerank(corpus, query, candidates, k).await;
        }

        let hits = candidates
            .into_iter()
            .filter_map(|(doc_id, score)| {
                let doc = self.catalog.document(corpus, &doc_id)?;
                Some(Hit {
                    title: doc.title,
                    snippet: truncate_chars(&doc.content, self.snippet_chars),
                    score,
                    source: doc.source,
                })
            })
            .take(k)
            .collect();

        Ok(hits)
    }

    /// Ask the small model for a relevance permutation over the candidates.
    async fn rerank(
        &self,
        corpus: &str,
        query: &str,
        candidates: Vec<(String, f32)>,
        k: usize,
    ) -> Vec<(String, f32)> {
        let mut listing = String::new();
        for (i, (doc_id, _)) in candidates.iter().enumerate() {
            let Some(doc) = self.catalog.document(corpus, doc_id) else {
                continue;
            };
            listing.push_str(&format!(
                "[{}] {}\n{}\n\n",
                i + 1,
                doc.title,
                truncate_chars(&doc.content, self.snippet_chars)
            ));
        }

        let prompt = format!(
            "Rank the numbered documents below by relevance to the query, most \
             relevant first.\n\nQuery: {query}\n\nDocuments:\n{listing}\
             Reply with ONLY a JSON array of the document numbers in ranked \
             order, e.g. [2, 1, 3]."
        );

        let response = self
            .gateway
            .chat(
                ModelClass::Small,
                vec![ChatMessage::user(prompt)],
                ChatOptions {
                    temperature: 0.0,
                    max_tokens: 256,
                },
            )
            .await;

        match response {
            Ok(text) => match parse_permutation(&text, candidates.len()) {
                Some(order) if order.len() >= k.min(candidates.len()) => {
                    order.into_iter().map(|i| candidates[i].clone()).collect()
                }
                _ => {
                    warn!("Rerank response was not a usable permutation, keeping cosine order");
                    candidates
                }
            },
            Err(e) => {
                warn!(error = %e, "Rerank call failed, keeping cosine order");
                candidates
            }
        }
    }
}

/// Parse a rerank response into zero-based candidate indices.
///
/// Accepts a JSON integer array (possibly inside a code fence) or a bare
/// separated list of integers. Indices are 1-based in the reply;
/// duplicates and out-of-range values invalidate nothing, they are
/// dropped.
fn parse_permutation(text: &str, candidate_count: usize) -> Option<Vec<usize>> {
    let trimmed = strip_code_fence(text.trim());

    let numbers: Vec<i64> = if let Ok(serde_json::Value::Array(items)) =
        serde_json::from_str::<serde_json::Value>(trimmed)
    {
        items.iter().filter_map(|v| v.as_i64()).collect()
    } else {
        trimmed
            .split(|c: char| !c.is_ascii_digit() && c != '-')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<i64>().ok())
            .collect()
    };

    let mut seen = vec![false; candidate_count];
    let mut order = Vec::new();
    for n in numbers {
        if n >= 1 && (n as usize) <= candidate_count {
            let idx = (n - 1) as usize;
            if !seen[idx] {
                seen[idx] = true;
                order.push(idx);
            }
        }
    }

    if order.is_empty() {
        None
    } else {
        Some(order)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().trim_end_matches("```").trim()
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}
