use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::strip_code_fence;
use crate::{Agent, AgentInput, AgentResult};

/// Produces a code snippet or worked calculation for the request and
/// records it under `tool_outputs.calculations`.
pub struct CodeAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl CodeAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for CodeAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let language = input.setting_str("language").unwrap_or("python").to_string();

            let prompt = format!(
                "Solve this with {language} code. Output the code followed by a one-line \
                 comment stating the expected result.\n\nTask: {}",
                input.user_message
            );

            let reply = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions {
                        temperature: 0.1,
                        max_tokens: 1024,
                    },
                )
                .await?;

            let snippet = strip_code_fence(&reply).to_string();
            let entry = serde_json::json!({
                "language": language,
                "code": snippet,
            });

            Ok(AgentResult::new("code", snippet.clone())
                .with_metadata("language", serde_json::json!(language))
                .with_update(
                    keys::TOOL_OUTPUTS,
                    serde_json::json!({ "calculations": [entry] }),
                ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_input, StubGateway};
    use trellis_core::types::ContextData;

    #[tokio::test]
    async fn test_snippet_lands_in_calculations() {
        let gateway = StubGateway::new("```python\nprint(2 + 2)  # 4\n```");
        let agent = CodeAgent::new(gateway.clone());

        let result = agent
            .execute(agent_input(
                "what is 2 + 2",
                ContextData::new(),
                serde_json::Value::Null,
            ))
            .await
            .unwrap();

        assert!(gateway.prompt().contains("python"));
        assert_eq!(result.content, "print(2 + 2)  # 4");

        let calculations = result.context_updates[keys::TOOL_OUTPUTS]["calculations"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(calculations.len(), 1);
        assert_eq!(calculations[0]["language"], serde_json::json!("python"));
        assert_eq!(
            calculations[0]["code"],
            serde_json::json!("print(2 + 2)  # 4")
        );
    }

    #[tokio::test]
    async fn test_language_setting_overrides_default() {
        let gateway = StubGateway::new("let x = 4;");
        let agent = CodeAgent::new(gateway.clone());

        let result = agent
            .execute(agent_input(
                "compute",
                ContextData::new(),
                serde_json::json!({"language": "rust"}),
            ))
            .await
            .unwrap();
        assert!(gateway.prompt().contains("rust"));
        assert_eq!(result.metadata["language"], serde_json::json!("rust"));
    }
}
