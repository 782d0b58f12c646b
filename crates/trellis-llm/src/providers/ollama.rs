use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{ChatMessage, ChatOptions};

/// Maximum characters per text sent to the Ollama embedding endpoint.
const MAX_EMBED_CHARS: usize = 2048;

/// Local Ollama client for chat and embeddings.
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
            options: GenOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        let body: ChatResponse = self.read_json(response, model).await?;
        Ok(body.message.content)
    }

    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama embeds one batch per request; oversized texts are truncated
        let input: Vec<&str> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_EMBED_CHARS {
                    let mut end = MAX_EMBED_CHARS;
                    while !t.is_char_boundary(end) {
                        end -= 1;
                    }
                    &t[..end]
                } else {
                    t.as_str()
                }
            })
            .collect();

        let request = EmbedRequest { model, input };

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        let body: EmbedResponse = self.read_json(response, model).await?;
        Ok(body.embeddings)
    }

    fn connect_error(&self, e: reqwest::Error) -> TrellisError {
        if e.is_connect() {
            TrellisError::Provider(format!(
                "cannot connect to Ollama at {} (is `ollama serve` running?)",
                self.base_url
            ))
        } else {
            TrellisError::Provider(format!("ollama request failed: {e}"))
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        model: &str,
    ) -> Result<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TrellisError::Provider(format!(
                "ollama model '{model}' not found (run: ollama pull {model})"
            )));
        }
        if !status.is_success() {
            return Err(TrellisError::Provider(format!(
                "ollama API error: HTTP {status}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TrellisError::Provider(format!("malformed ollama response: {e}")))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: GenOptions,
}

#[derive(Serialize)]
struct GenOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
