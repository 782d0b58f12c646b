use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::best_source_text;
use crate::{Agent, AgentInput, AgentResult};

/// Rewrites the running answer into a requested presentation style.
pub struct FormattingAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl FormattingAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for FormattingAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let style = input.setting_str("style").unwrap_or("markdown").to_string();
            // This agent restyles the running answer; raw upload text is
            // only a last resort when nothing has produced one yet.
            let source = input
                .context_str(keys::FINAL_ANSWER)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    best_source_text(&input.context, &input.user_message).to_string()
                });

            let prompt = format!(
                "Reformat the content below as {style}. Preserve the information; \
                 change only structure and presentation.\n\n{source}"
            );

            let formatted = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions::default(),
                )
                .await?;

            Ok(AgentResult::new("format", formatted.clone())
                .with_metadata("style", serde_json::json!(style))
                .with_update(keys::FINAL_ANSWER, serde_json::json!(formatted)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_input, StubGateway};
    use trellis_core::types::ContextData;

    #[tokio::test]
    async fn test_reformats_final_answer_not_upload() {
        let gateway = StubGateway::new("- formatted");
        let agent = FormattingAgent::new(gateway.clone());

        let mut context = ContextData::new();
        context.insert(
            keys::UPLOADED_CONTENT.into(),
            serde_json::json!("raw upload text"),
        );
        context.insert(
            keys::FINAL_ANSWER.into(),
            serde_json::json!("synthesized answer"),
        );

        let result = agent
            .execute(agent_input(
                "q",
                context,
                serde_json::json!({"style": "bullet points"}),
            ))
            .await
            .unwrap();

        let prompt = gateway.prompt();
        assert!(prompt.contains("synthesized answer"));
        assert!(!prompt.contains("raw upload text"));
        assert!(prompt.contains("bullet points"));
        assert_eq!(result.action, "format");
        assert_eq!(
            result.context_updates[keys::FINAL_ANSWER],
            serde_json::json!("- formatted")
        );
    }

    #[tokio::test]
    async fn test_falls_back_when_no_answer_yet() {
        let gateway = StubGateway::new("formatted");
        let agent = FormattingAgent::new(gateway.clone());

        let mut context = ContextData::new();
        context.insert(
            keys::UPLOADED_CONTENT.into(),
            serde_json::json!("raw upload text"),
        );

        agent
            .execute(agent_input("q", context, serde_json::Value::Null))
            .await
            .unwrap();
        assert!(gateway.prompt().contains("raw upload text"));
        // default style when settings carry none
        assert!(gateway.prompt().contains("markdown"));
    }
}
