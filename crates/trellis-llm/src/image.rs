use tracing::info;

use trellis_core::config::{AppConfig, ImageProvider};
use trellis_core::error::Result;

use crate::providers::OpenAiClient;

const DALLE_MODEL: &str = "dall-e-3";

/// Image generation surface for the image_generator agent.
///
/// Only the dalle provider has a live backend here; gemini and
/// nano-banana record prompt-only entries (no URL) so the workflow still
/// carries the composed prompt downstream.
pub struct ImageClient {
    provider: ImageProvider,
    openai: Option<OpenAiClient>,
}

impl ImageClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let openai = match config.image_provider {
            ImageProvider::Dalle => Some(OpenAiClient::new(
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
            )),
            _ => None,
        };
        Self {
            provider: config.image_provider,
            openai,
        }
    }

    pub fn provider(&self) -> ImageProvider {
        self.provider
    }

    /// Generate an image for the prompt, returning its URL when a live
    /// backend is configured.
    pub async fn generate(&self, prompt: &str) -> Result<Option<String>> {
        match &self.openai {
            Some(client) => {
                let url = client.generate_image(DALLE_MODEL, prompt).await?;
                info!(has_url = url.is_some(), "Image generated");
                Ok(url)
            }
            None => {
                info!(provider = self.provider.as_str(), "Image provider has no live backend; recording prompt only");
                Ok(None)
            }
        }
    }
}
