use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use trellis_llm::ImageClient;

use crate::{Agent, AgentInput, AgentResult};

/// Composes a refined image prompt and calls the configured image
/// provider. Generated entries land in `tool_outputs.images`.
pub struct ImageGeneratorAgent {
    gateway: Arc<dyn ModelGateway>,
    images: Arc<ImageClient>,
}

impl ImageGeneratorAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>, images: Arc<ImageClient>) -> Self {
        Self { gateway, images }
    }
}

impl Agent for ImageGeneratorAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let style = input.setting_str("style").unwrap_or("natural").to_string();

            let compose = format!(
                "Write a single vivid image-generation prompt (one sentence, {style} \
                 style) for this request: {}",
                input.user_message
            );
            // A failed compose is not worth aborting generation over
            let image_prompt = match self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(compose)],
                    ChatOptions {
                        temperature: 0.7,
                        max_tokens: 200,
                    },
                )
                .await
            {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!(error = %e, "Prompt composition failed, using the raw request");
                    input.user_message.clone()
                }
            };

            let url = self.images.generate(&image_prompt).await?;
            let has_data = url.is_some();

            let entry = serde_json::json!({
                "prompt": image_prompt,
                "style": style,
                "url": url,
                "has_data": has_data,
            });

            let content = if has_data {
                format!("Generated image for: {image_prompt}")
            } else {
                format!("Prepared image prompt: {image_prompt}")
            };

            Ok(AgentResult::new("generate_image", content)
                .with_metadata("provider", serde_json::json!(self.images.provider().as_str()))
                .with_update(
                    keys::TOOL_OUTPUTS,
                    serde_json::json!({ "images": [entry] }),
                ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_input, test_config, StubGateway};
    use trellis_core::types::ContextData;

    #[tokio::test]
    async fn test_prompt_only_entry_without_live_backend() {
        let gateway = StubGateway::new("A watercolor cat on a windowsill");
        // nano-banana has no live backend, so no URL is produced
        let images = Arc::new(ImageClient::from_config(&test_config()));
        let agent = ImageGeneratorAgent::new(gateway.clone(), images);

        let result = agent
            .execute(agent_input(
                "draw me a cat",
                ContextData::new(),
                serde_json::json!({"style": "watercolor"}),
            ))
            .await
            .unwrap();

        assert!(gateway.prompt().contains("watercolor"));
        assert!(gateway.prompt().contains("draw me a cat"));

        let entries = result.context_updates[keys::TOOL_OUTPUTS]["images"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0]["prompt"],
            serde_json::json!("A watercolor cat on a windowsill")
        );
        assert_eq!(entries[0]["style"], serde_json::json!("watercolor"));
        assert_eq!(entries[0]["has_data"], serde_json::json!(false));
        assert!(entries[0]["url"].is_null());
        assert_eq!(result.metadata["provider"], serde_json::json!("nano-banana"));
        assert!(result.content.starts_with("Prepared image prompt"));
    }
}
