use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use trellis_core::context::keys;
use trellis_core::error::Result;
use trellis_core::traits::ModelGateway;
use trellis_core::types::{ChatMessage, ChatOptions};

use crate::util::parse_json_loose;
use crate::{Agent, AgentInput, AgentResult};

/// Branch router: inspects the tool nodes reachable in the graph and
/// publishes the subset to run as `selected_tools`. Paths to unselected
/// tools are pruned by the engine's exclusion policy.
pub struct OrchestratorAgent {
    gateway: Arc<dyn ModelGateway>,
}

impl OrchestratorAgent {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }
}

/// One selectable tool as shown to the model.
#[derive(Debug, Clone)]
struct ToolChoice {
    id: String,
    kind: String,
}

fn available_tools(input: &AgentInput) -> Vec<ToolChoice> {
    input
        .context
        .get(keys::AVAILABLE_TOOLS)
        .and_then(|v| v.as_array())
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    Some(ToolChoice {
                        id: t.get("id")?.as_str()?.to_string(),
                        kind: t
                            .get("type")
                            .and_then(|v| v.as_str())
                            .unwrap_or("tool")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Map the model's reply onto known tool node ids. Entries may name a
/// node id or a tool type; unknown entries are dropped. A reply that
/// selects nothing recognisable falls back to every available tool.
fn parse_selection(reply: &str, tools: &[ToolChoice]) -> Vec<String> {
    let entries: Vec<String> = parse_json_loose(reply)
        .and_then(|value| {
            value.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
        })
        .unwrap_or_default();

    let mut selected = Vec::new();
    for entry in &entries {
        for tool in tools {
            if (entry == &tool.id || entry == &tool.kind) && !selected.contains(&tool.id) {
                selected.push(tool.id.clone());
            }
        }
    }

    // an explicit "none" (or any recognisable-but-unknown selection) is a
    // legitimate empty choice; an unparseable reply is not
    if selected.is_empty() && entries.is_empty() {
        warn!("Orchestrator reply was unparseable, selecting all available tools");
        return tools.iter().map(|t| t.id.clone()).collect();
    }
    selected
}

impl Agent for OrchestratorAgent {
    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
        Box::pin(async move {
            let tools = available_tools(&input);
            if tools.is_empty() {
                return Ok(AgentResult::new("route", "No tools available to select.")
                    .with_update(keys::SELECTED_TOOLS, serde_json::json!([])));
            }

            let listing = tools
                .iter()
                .map(|t| format!("- {} ({})", t.id, t.kind))
                .collect::<Vec<_>>()
                .join("\n");

            let prompt = format!(
                "You are a workflow router. Decide which of these tools should run \
                 for the user request.\n\nTools:\n{listing}\n\nRequest: {}\n\n\
                 Reply with ONLY a JSON array of tool ids to run, e.g. [\"{}\"]. \
                 Reply with [\"none\"] if no tool is needed.",
                input.user_message, tools[0].id
            );

            let reply = self
                .gateway
                .chat(
                    input.model_class,
                    vec![ChatMessage::user(prompt)],
                    ChatOptions {
                        temperature: 0.0,
                        max_tokens: 256,
                    },
                )
                .await?;

            let selected = parse_selection(&reply, &tools);
            let content = if selected.is_empty() {
                "No tools selected.".to_string()
            } else {
                format!("Selected tools: {}", selected.join(", "))
            };

            Ok(AgentResult::new("route", content)
                .with_metadata("available_tools", serde_json::json!(tools.len()))
                .with_metadata("selected", serde_json::json!(selected.clone()))
                .with_update(keys::SELECTED_TOOLS, serde_json::json!(selected)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolChoice> {
        vec![
            ToolChoice {
                id: "s1".into(),
                kind: "semantic_search".into(),
            },
            ToolChoice {
                id: "i1".into(),
                kind: "image_generator".into(),
            },
        ]
    }

    #[test]
    fn test_selection_by_id() {
        assert_eq!(parse_selection(r#"["s1"]"#, &tools()), vec!["s1"]);
    }

    #[test]
    fn test_selection_by_type_name() {
        assert_eq!(
            parse_selection(r#"["image_generator"]"#, &tools()),
            vec!["i1"]
        );
    }

    #[test]
    fn test_selection_none_is_empty() {
        assert!(parse_selection(r#"["none"]"#, &tools()).is_empty());
    }

    #[test]
    fn test_unparseable_reply_selects_everything() {
        assert_eq!(
            parse_selection("let me think about this", &tools()),
            vec!["s1", "i1"]
        );
    }

    #[test]
    fn test_unknown_entries_are_dropped() {
        assert_eq!(parse_selection(r#"["s1", "w9"]"#, &tools()), vec!["s1"]);
    }
}
