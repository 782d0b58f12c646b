use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{ChatMessage, ChatOptions};

/// OpenAI-compatible client. Works with OpenAI and any server exposing the
/// same chat-completions and embeddings endpoints.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            TrellisError::Configuration(
                "OPENAI_API_KEY is required for the openai provider".into(),
            )
        })
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String> {
        let key = self.key()?;
        let request = ChatRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrellisError::Provider(format!("openai request failed: {e}")))?;

        let body: ChatResponse = read_json(response).await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TrellisError::Provider("openai returned no choices".into()))
    }

    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let key = self.key()?;
        let request = EmbeddingRequest {
            model,
            input: texts,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrellisError::Provider(format!("openai embeddings failed: {e}")))?;

        let body: EmbeddingResponse = read_json(response).await?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Generate an image and return its URL (DALL-E).
    pub async fn generate_image(&self, model: &str, prompt: &str) -> Result<Option<String>> {
        let key = self.key()?;
        let request = ImageRequest {
            model,
            prompt,
            n: 1,
            size: "1024x1024",
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrellisError::Provider(format!("image generation failed: {e}")))?;

        let body: ImageResponse = read_json(response).await?;
        Ok(body.data.into_iter().next().and_then(|d| d.url))
    }
}

/// Map an HTTP response into a deserialized body, converting error
/// statuses into the gateway's error kinds. Provider payloads are not
/// echoed verbatim into the error.
async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TrellisError::RateLimited("openai quota exhausted".into()));
    }
    if !status.is_success() {
        return Err(TrellisError::Provider(format!(
            "openai API error: HTTP {status}"
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| TrellisError::Provider(format!("malformed openai response: {e}")))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}
