use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::best_source_text;
use crate::{Agent, AgentInput, AgentResult};

/// Translates the best available text into a target language.
pub struct TranslatorAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl TranslatorAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for TranslatorAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let language = input
                .setting_str("targetLanguage")
                .unwrap_or("English")
                .to_string();
            let source = best_source_text(&input.context, &input.user_message).to_string();

            let prompt = format!(
                "Translate the following content into {language}. Output ONLY the \
                 translation.\n\n{source}"
            );

            let translated = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions::default(),
                )
                .await?;

            Ok(AgentResult::new("translate", translated.clone())
                .with_metadata("target_language", serde_json::json!(language))
                .with_update(keys::TRANSLATED_CONTENT, serde_json::json!(translated)))
        })
    }
}
