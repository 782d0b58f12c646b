use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::best_source_text;
use crate::{Agent, AgentInput, AgentResult};

/// Condenses the best available source text into a summary.
pub struct SummarizationAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl SummarizationAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for SummarizationAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let max_words = input.setting_usize("maxWords", 150);
            let source = best_source_text(&input.context, &input.user_message).to_string();

            let prompt = format!(
                "Summarize the following content in at most {max_words} words. Keep \
                 the key facts and figures.\n\n{source}"
            );

            let summary = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions::default(),
                )
                .await?;

            Ok(AgentResult::new("summarize", summary.clone())
                .with_update(keys::FINAL_ANSWER, serde_json::json!(summary)))
        })
    }
}
