use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::{Agent, AgentInput, AgentResult};

/// Planner agent: sketches how downstream nodes should approach the
/// request and records the plan in context.
pub struct SupervisorAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl SupervisorAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

impl Agent for SupervisorAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let style = input.setting_str("planningStyle").unwrap_or("concise");
            let auto_rag = input.setting_bool("autoRAG", false);

            let downstream = input
                .context
                .get(keys::DOWNSTREAM_NODES)
                .and_then(|v| v.as_array())
                .map(|nodes| {
                    nodes
                        .iter()
                        .filter_map(|n| n.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();

            let mut prompt = format!(
                "You are a workflow supervisor. Produce a {style} step-by-step plan \
                 for answering the request below. Downstream steps available: {downstream}.\n\n\
                 Request: {}",
                input.user_message
            );
            if auto_rag {
                prompt.push_str(
                    "\n\nNote whether document retrieval would improve the answer and, \
                     if so, what to search for.",
                );
            }
            if let Some(uploaded) = input.context_str(keys::UPLOADED_CONTENT) {
                if !uploaded.trim().is_empty() {
                    prompt.push_str("\n\nAn uploaded document is available to later steps.");
                }
            }

            let plan = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions::default(),
                )
                .await?;

            Ok(AgentResult::new("plan", plan.clone())
                .with_update(keys::SUPERVISOR_PLAN, serde_json::json!(plan)))
        })
    }
}
