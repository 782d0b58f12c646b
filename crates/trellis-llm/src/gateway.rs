use futures::future::BoxFuture;
use tracing::debug;

use trellis_core::config::{AppConfig, ModelConfig, Provider};
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions, ModelClass};

use crate::providers::{AnthropicClient, OllamaClient, OpenAiClient};

enum Backend {
    OpenAi(OpenAiClient),
    Anthropic {
        chat: AnthropicClient,
        // Anthropic has no embeddings endpoint; embeds go through the
        // OpenAI-compatible surface.
        embeddings: OpenAiClient,
    },
    Ollama(OllamaClient),
}

/// The concrete model gateway: one provider choice, per-class model ids,
/// configured once at startup.
pub struct LlmGateway {
    backend: Backend,
    models: ModelConfig,
}

impl LlmGateway {
    pub fn from_config(config: &AppConfig) -> Self {
        let backend = match config.provider {
            Provider::OpenAi => Backend::OpenAi(OpenAiClient::new(
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
            )),
            Provider::Anthropic => Backend::Anthropic {
                chat: AnthropicClient::new(config.anthropic_api_key.clone()),
                embeddings: OpenAiClient::new(
                    config.openai_base_url.clone(),
                    config.openai_api_key.clone(),
                ),
            },
            Provider::Ollama => Backend::Ollama(OllamaClient::new(config.ollama_base_url.clone())),
        };
        Self {
            backend,
            models: config.models.clone(),
        }
    }
}

impl ModelGateway for LlmGateway {
    fn chat(
        &self,
        class: ModelClass,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let model = self.models.for_class(class);
            debug!(model, messages = messages.len(), "Gateway chat call");
            match &self.backend {
                Backend::OpenAi(client) => client.chat(model, &messages, &options).await,
                Backend::Anthropic { chat, .. } => chat.chat(model, &messages, &options).await,
                Backend::Ollama(client) => client.chat(model, &messages, &options).await,
            }
        })
    }

    fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let model = &self.models.embedding;
            debug!(model, texts = texts.len(), "Gateway embed call");
            match &self.backend {
                Backend::OpenAi(client) => client.embed(model, &texts).await,
                Backend::Anthropic { embeddings, .. } => embeddings.embed(model, &texts).await,
                Backend::Ollama(client) => client.embed(model, &texts).await,
            }
        })
    }

    fn model_label(&self, class: ModelClass) -> String {
        self.models.for_class(class).to_string()
    }
}
