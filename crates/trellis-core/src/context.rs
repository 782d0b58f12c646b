use serde::{Deserialize, Serialize};

use crate::types::ContextData;

/// Documented context keys. Agents may introduce their own namespaced keys;
/// the engine only ever references these.
pub mod keys {
    pub const USER_MESSAGE: &str = "user_message";
    pub const UPLOADED_CONTENT: &str = "uploaded_content";
    pub const UPLOAD_INSTRUCTION: &str = "upload_instruction";
    pub const SUPERVISOR_PLAN: &str = "supervisor_plan";
    pub const SEMANTIC_RESULTS: &str = "semantic_results";
    pub const CANDIDATES: &str = "candidates";
    pub const FINAL_ANSWER: &str = "final_answer";
    pub const TRANSFORMED_CONTENT: &str = "transformed_content";
    pub const TRANSLATED_CONTENT: &str = "translated_content";
    pub const TOOL_OUTPUTS: &str = "tool_outputs";
    pub const SELECTED_TOOLS: &str = "selected_tools";
    pub const AVAILABLE_TOOLS: &str = "available_tools";
    pub const DOWNSTREAM_NODES: &str = "downstream_nodes";
}

/// Check documented keys against their documented shapes. Unknown keys
/// are accepted; a documented key holding the wrong shape is a contract
/// violation the engine treats as fatal.
pub fn validate_types(updates: &ContextData) -> std::result::Result<(), String> {
    for (key, value) in updates {
        let ok = match key.as_str() {
            keys::USER_MESSAGE
            | keys::UPLOADED_CONTENT
            | keys::UPLOAD_INSTRUCTION
            | keys::SUPERVISOR_PLAN
            | keys::FINAL_ANSWER
            | keys::TRANSFORMED_CONTENT
            | keys::TRANSLATED_CONTENT => value.is_string(),
            keys::SEMANTIC_RESULTS
            | keys::CANDIDATES
            | keys::SELECTED_TOOLS
            | keys::AVAILABLE_TOOLS
            | keys::DOWNSTREAM_NODES => value.is_array(),
            keys::TOOL_OUTPUTS => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "context key '{key}' holds a value of the wrong shape"
            ));
        }
    }
    Ok(())
}

/// Per-run keyed store of intermediate results.
///
/// One instance per run, owned by the engine. Writes are additive; a key
/// written twice is overwritten by the later writer. Agents receive a
/// snapshot and hand writes back through `AgentResult::context_updates`,
/// so the store itself is never shared across concurrent calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStore {
    data: ContextData,
}

impl ContextStore {
    pub fn new() -> Self {
        let mut store = Self::default();
        // tool_outputs always exists so agents can append without checking
        store.data.insert(
            keys::TOOL_OUTPUTS.into(),
            serde_json::json!({
                "images": [],
                "calculations": [],
                "web_results": [],
                "docs": [],
            }),
        );
        store
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Merge agent context updates. Array values under `tool_outputs`
    /// sub-keys and `semantic_results`/`candidates` extend rather than
    /// replace, matching how agents accumulate outputs.
    pub fn merge(&mut self, updates: ContextData) {
        for (key, value) in updates {
            match key.as_str() {
                keys::TOOL_OUTPUTS => self.merge_tool_outputs(value),
                _ => {
                    self.data.insert(key, value);
                }
            }
        }
    }

    fn merge_tool_outputs(&mut self, value: serde_json::Value) {
        let serde_json::Value::Object(incoming) = value else {
            return;
        };
        let entry = self
            .data
            .entry(keys::TOOL_OUTPUTS.to_string())
            .or_insert_with(|| serde_json::json!({}));
        let Some(existing) = entry.as_object_mut() else {
            return;
        };
        for (sub_key, sub_value) in incoming {
            match (existing.get_mut(&sub_key), sub_value) {
                (Some(serde_json::Value::Array(current)), serde_json::Value::Array(new)) => {
                    current.extend(new);
                }
                (_, other) => {
                    existing.insert(sub_key, other);
                }
            }
        }
    }

    /// An owned snapshot for handing to an agent or emitting in events.
    pub fn snapshot(&self) -> ContextData {
        self.data.clone()
    }

    pub fn data(&self) -> &ContextData {
        &self.data
    }

    /// The tool outputs bundle for the done payload.
    pub fn tool_outputs(&self) -> serde_json::Value {
        self.data
            .get(keys::TOOL_OUTPUTS)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// The published `selected_tools` set, if any ancestor wrote one.
    pub fn selected_tools(&self) -> Option<Vec<String>> {
        self.data.get(keys::SELECTED_TOOLS).map(|v| {
            v.as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|x| x.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}
