use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions, ModelClass};

use crate::util::format_semantic_results;
use crate::{Agent, AgentInput, AgentResult};

/// Folds everything upstream produced into one final answer.
pub struct SynthesisAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl SynthesisAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for SynthesisAgent {
    fn default_model(&self) -> ModelClass {
        ModelClass::Large
    }

    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let max_words = input.setting_usize("maxWords", 0);

            let mut prompt = format!("Answer the request below.\n\nRequest: {}\n", input.user_message);

            if let Some(plan) = input.context_str(keys::SUPERVISOR_PLAN) {
                prompt.push_str(&format!("\nPlan to follow:\n{plan}\n"));
            }
            if let Some(snippets) = format_semantic_results(&input.context) {
                prompt.push_str(&format!(
                    "\nUse these retrieved documents, citing titles where relevant:\n{snippets}"
                ));
            }
            if let Some(candidates) = input.context.get(keys::CANDIDATES).and_then(|v| v.as_array())
            {
                if !candidates.is_empty() {
                    prompt.push_str("\nCandidate drafts to draw from:\n");
                    for (i, candidate) in candidates.iter().enumerate() {
                        if let Some(text) = candidate.as_str() {
                            prompt.push_str(&format!("--- candidate {} ---\n{text}\n", i + 1));
                        }
                    }
                }
            }
            if let Some(uploaded) = input.context_str(keys::UPLOADED_CONTENT) {
                if !uploaded.trim().is_empty() {
                    prompt.push_str(&format!("\nUploaded document content:\n{uploaded}\n"));
                }
            }
            if max_words > 0 {
                prompt.push_str(&format!("\nKeep the answer under {max_words} words."));
            }

            let answer = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions {
                        temperature: 0.3,
                        max_tokens: 2048,
                    },
                )
                .await?;

            Ok(AgentResult::new("synthesize", answer.clone())
                .with_update(keys::FINAL_ANSWER, serde_json::json!(answer)))
        })
    }
}
