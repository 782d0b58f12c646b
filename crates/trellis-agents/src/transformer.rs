use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions, ModelClass};

use crate::util::{best_source_text, strip_code_fence};
use crate::{Agent, AgentInput, AgentResult};

/// Converts source material into a target format, typically CSV for a
/// spreadsheet output node.
pub struct TransformerAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl TransformerAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for TransformerAgent {
    fn default_model(&self) -> ModelClass {
        ModelClass::Large
    }

    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let to_format = input.setting_str("toFormat").unwrap_or("csv").to_string();
            let source = best_source_text(&input.context, &input.user_message).to_string();

            let format_rules = if to_format == "csv" {
                "Output ONLY CSV: a header row, then one row per record, comma-separated, \
                 no commentary and no code fences."
            } else {
                "Output ONLY the converted content, no commentary."
            };

            let prompt = format!(
                "Convert the content below into {to_format}. {format_rules}\n\n\
                 Instruction: {}\n\nContent:\n{source}",
                input.user_message
            );

            let reply = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions {
                        temperature: 0.1,
                        max_tokens: 4096,
                    },
                )
                .await?;

            let transformed = strip_code_fence(&reply).to_string();

            Ok(AgentResult::new("transform", transformed.clone())
                .with_metadata("to_format", serde_json::json!(to_format))
                .with_update(keys::TRANSFORMED_CONTENT, serde_json::json!(transformed)))
        })
    }
}
