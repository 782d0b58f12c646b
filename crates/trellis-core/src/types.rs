use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of node types a workflow may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Prompt,
    Upload,
    Supervisor,
    Orchestrator,
    SemanticSearch,
    Sampler,
    Synthesis,
    Transformer,
    Translator,
    ImageGenerator,
    Summarization,
    Formatting,
    Code,
    Response,
    Spreadsheet,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "upload" => Some(Self::Upload),
            "supervisor" => Some(Self::Supervisor),
            "orchestrator" => Some(Self::Orchestrator),
            "semantic_search" => Some(Self::SemanticSearch),
            "sampler" => Some(Self::Sampler),
            "synthesis" => Some(Self::Synthesis),
            "transformer" => Some(Self::Transformer),
            "translator" => Some(Self::Translator),
            "image_generator" => Some(Self::ImageGenerator),
            "summarization" => Some(Self::Summarization),
            "formatting" => Some(Self::Formatting),
            "code" => Some(Self::Code),
            "response" => Some(Self::Response),
            "spreadsheet" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Upload => "upload",
            Self::Supervisor => "supervisor",
            Self::Orchestrator => "orchestrator",
            Self::SemanticSearch => "semantic_search",
            Self::Sampler => "sampler",
            Self::Synthesis => "synthesis",
            Self::Transformer => "transformer",
            Self::Translator => "translator",
            Self::ImageGenerator => "image_generator",
            Self::Summarization => "summarization",
            Self::Formatting => "formatting",
            Self::Code => "code",
            Self::Response => "response",
            Self::Spreadsheet => "spreadsheet",
        }
    }

    pub fn category(&self) -> NodeCategory {
        match self {
            Self::Prompt | Self::Upload => NodeCategory::Input,
            Self::Response | Self::Spreadsheet => NodeCategory::Output,
            Self::SemanticSearch | Self::ImageGenerator | Self::Code => NodeCategory::Tool,
            _ => NodeCategory::Agent,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category derived from node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Input,
    Agent,
    Tool,
    Output,
}

/// Which model tier an agent call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    #[default]
    Small,
    Large,
}

impl ModelClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "small" => Some(Self::Small),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

/// Per-run state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Pending,
    Running,
    Executed,
    Excluded,
    Error,
}

/// An uploaded file attached to an upload node.
///
/// Text formats carry raw text in `content`; binary formats carry base64
/// behind a `__PDF_BASE64__` or `__DOCX_BASE64__` prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// The `data` payload of a workflow node as sent by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(rename = "nodeType", default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(rename = "promptText", default)]
    pub prompt_text: Option<String>,
    #[serde(rename = "uploadedFiles", default)]
    pub uploaded_files: Option<Vec<UploadedFile>>,
    #[serde(rename = "uploadInstruction", default)]
    pub upload_instruction: Option<String>,
}

/// One node of the submitted workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub position: Option<serde_json::Value>,
    #[serde(default)]
    pub data: NodeData,
}

impl WorkflowNode {
    /// Resolve the node's type: the `data.nodeType` field wins, else the
    /// id prefix before the first `-` (matching what callers send).
    pub fn node_type(&self) -> Option<NodeType> {
        if let Some(t) = self.data.node_type.as_deref() {
            return NodeType::parse(t);
        }
        let prefix = self.id.split('-').next().unwrap_or(&self.id);
        NodeType::parse(prefix)
    }

    /// Raw type string for error messages, even when unknown.
    pub fn raw_type(&self) -> &str {
        self.data
            .node_type
            .as_deref()
            .unwrap_or_else(|| self.id.split('-').next().unwrap_or(&self.id))
    }

    pub fn settings(&self) -> serde_json::Value {
        self.data
            .settings
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

/// One workflow execution request as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub message: String,
    pub workflow_nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub workflow_edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub knowledge_base: Option<String>,
}

/// A chat message sent to the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }
}

/// Options for a single chat call.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// One retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub source: String,
}

/// A document loaded from a corpus directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub corpus: String,
    pub title: String,
    pub content: String,
    pub source: String,
    /// Hex sha-256 digest of the raw bytes.
    pub content_hash: String,
}

/// A stored embedding for one document.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub document_id: String,
    pub corpus: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

/// Map settings values like `{"model": "large"}` onto a model class,
/// falling back to the agent's default for its type.
pub fn effective_model_class(settings: &serde_json::Value, default: ModelClass) -> ModelClass {
    settings
        .get("model")
        .and_then(|v| v.as_str())
        .and_then(ModelClass::parse)
        .unwrap_or(default)
}

/// Snapshot of context data exchanged with agents.
pub type ContextData = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip() {
        for t in [
            "prompt",
            "upload",
            "supervisor",
            "orchestrator",
            "semantic_search",
            "sampler",
            "synthesis",
            "transformer",
            "translator",
            "image_generator",
            "summarization",
            "formatting",
            "code",
            "response",
            "spreadsheet",
        ] {
            let parsed = NodeType::parse(t).expect(t);
            assert_eq!(parsed.as_str(), t);
        }
        assert!(NodeType::parse("teleporter").is_none());
    }

    #[test]
    fn test_categories() {
        assert_eq!(NodeType::Prompt.category(), NodeCategory::Input);
        assert_eq!(NodeType::Upload.category(), NodeCategory::Input);
        assert_eq!(NodeType::Response.category(), NodeCategory::Output);
        assert_eq!(NodeType::Spreadsheet.category(), NodeCategory::Output);
        assert_eq!(NodeType::SemanticSearch.category(), NodeCategory::Tool);
        assert_eq!(NodeType::ImageGenerator.category(), NodeCategory::Tool);
        assert_eq!(NodeType::Synthesis.category(), NodeCategory::Agent);
    }

    #[test]
    fn test_node_type_from_id_prefix() {
        let node = WorkflowNode {
            id: "orchestrator-1".into(),
            kind: None,
            position: None,
            data: NodeData::default(),
        };
        assert_eq!(node.node_type(), Some(NodeType::Orchestrator));
    }

    #[test]
    fn test_effective_model_class() {
        let settings = serde_json::json!({"model": "large"});
        assert_eq!(
            effective_model_class(&settings, ModelClass::Small),
            ModelClass::Large
        );
        let settings = serde_json::json!({});
        assert_eq!(
            effective_model_class(&settings, ModelClass::Small),
            ModelClass::Small
        );
    }

    #[test]
    fn test_execute_request_deserializes() {
        let raw = r#"{
            "message": "hello",
            "workflow_nodes": [
                {"id": "p1", "type": "custom", "position": {"x": 0, "y": 0},
                 "data": {"nodeType": "prompt", "label": "Prompt", "promptText": "Hi"}}
            ],
            "workflow_edges": [{"id": "e1", "source": "p1", "target": "r1"}]
        }"#;
        let req: ExecuteRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.workflow_nodes.len(), 1);
        assert_eq!(req.workflow_nodes[0].node_type(), Some(NodeType::Prompt));
        assert_eq!(req.workflow_edges[0].target, "r1");
    }
}
