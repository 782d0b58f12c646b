use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{ChatMessage, ChatOptions};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
    api_key: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
        }
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            TrellisError::Configuration(
                "ANTHROPIC_API_KEY is required for the anthropic provider".into(),
            )
        })?;

        // Anthropic takes system content as a top-level field
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Turn> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Turn {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let request = MessagesRequest {
            model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: turns,
        };

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrellisError::Provider(format!("anthropic request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TrellisError::RateLimited("anthropic quota exhausted".into()));
        }
        if !status.is_success() {
            return Err(TrellisError::Provider(format!(
                "anthropic API error: HTTP {status}"
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| TrellisError::Provider(format!("malformed anthropic response: {e}")))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(text)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn<'a>>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let client = AnthropicClient::new(None);
        let err = client
            .chat(
                "claude-3-haiku-20240307",
                &[ChatMessage::user("hi")],
                &ChatOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Configuration(_)));
    }

    #[test]
    fn test_system_messages_are_hoisted() {
        let messages = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("hi"),
        ];
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(system, vec!["You are terse."]);
    }
}
