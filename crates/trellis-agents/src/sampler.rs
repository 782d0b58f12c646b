use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::{format_semantic_results, parse_json_loose};
use crate::{Agent, AgentInput, AgentResult};

const DEFAULT_CANDIDATES: usize = 3;

/// Generates several candidate answers for a downstream synthesis step
/// to choose between.
pub struct SamplerAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl SamplerAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

/// Pull candidate strings out of the reply: a JSON string array when the
/// model cooperated, else double-newline separated blocks.
fn parse_candidates(reply: &str, expected: usize) -> Vec<String> {
    if let Some(serde_json::Value::Array(items)) = parse_json_loose(reply) {
        return items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .filter(|s| !s.trim().is_empty())
            .collect();
    }
    reply
        .split("\n\n")
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .take(expected)
        .collect()
}

impl Agent for SamplerAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let n = input.setting_usize("numCandidates", DEFAULT_CANDIDATES).max(1);

            let mut prompt = format!(
                "Draft {n} distinct candidate answers to the request below. Vary the \
                 angle or emphasis between candidates.\n\nRequest: {}\n",
                input.user_message
            );
            if let Some(snippets) = format_semantic_results(&input.context) {
                prompt.push_str(&format!("\nRelevant documents:\n{snippets}"));
            }
            prompt.push_str("\nReply with ONLY a JSON array of candidate strings.");

            let reply = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions {
                        temperature: 0.8,
                        max_tokens: 1536,
                    },
                )
                .await?;

            let candidates = parse_candidates(&reply, n);
            let content = format!("Generated {} candidate answers.", candidates.len());

            Ok(AgentResult::new("sample", content)
                .with_metadata("candidate_count", serde_json::json!(candidates.len()))
                .with_update(keys::CANDIDATES, serde_json::json!(candidates)))
        })
    }
}
