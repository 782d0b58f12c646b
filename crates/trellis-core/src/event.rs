use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::ContextData;

/// Bounded per-run event buffer. A slow consumer blocks the engine once
/// this many events are queued.
pub const EVENT_BUFFER: usize = 64;

/// The record of one agent invocation, emitted on AgentComplete and
/// collected into the final trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Node id the step belongs to.
    pub agent: String,
    /// Model label used, or "none".
    pub model: String,
    /// Action tag, e.g. "plan", "search", "synthesize", "exclude".
    pub action: String,
    /// Textual output of the step.
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub excluded: bool,
    /// Optional per-agent fields surfaced on the event bus.
    #[serde(flatten)]
    pub metadata: ContextData,
}

impl Step {
    pub fn new(
        agent: impl Into<String>,
        model: impl Into<String>,
        action: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            model: model.into(),
            action: action.into(),
            content: content.into(),
            excluded: false,
            metadata: ContextData::new(),
        }
    }

    pub fn excluded(agent: impl Into<String>, node_type: &str, reason: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            model: "none".into(),
            action: "exclude".into(),
            content: reason.into(),
            excluded: true,
            metadata: ContextData::from([(
                "agent_type".to_string(),
                serde_json::Value::String(node_type.to_string()),
            )]),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The final payload of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonePayload {
    pub answer: String,
    pub tool_outputs: serde_json::Value,
    pub trace: Trace,
    pub latency_ms: u64,
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub steps: Vec<Step>,
}

/// Progress events for one run, in emission order, terminated by exactly
/// one of Done or Error.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    AgentStart { agent: String },
    AgentComplete { agent: String, step: Step },
    Done(Box<DonePayload>),
    Error { message: String },
}

impl WorkflowEvent {
    /// SSE tag for this event.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentComplete { .. } => "agent_complete",
            Self::Done(_) => "done",
            Self::Error { .. } => "error",
        }
    }

    /// JSON payload carried on the `data:` line.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::AgentStart { agent } => {
                serde_json::json!({"agent": agent, "status": "working"})
            }
            Self::AgentComplete { agent, step } => {
                serde_json::json!({"agent": agent, "step": step})
            }
            Self::Done(payload) => serde_json::to_value(payload.as_ref())
                .unwrap_or_else(|_| serde_json::json!({})),
            Self::Error { message } => serde_json::json!({"message": message}),
        }
    }

    /// Render the event as a Server-Sent Event frame.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.tag(), self.payload())
    }
}

/// Create the bounded per-run event channel.
pub fn event_channel() -> (mpsc::Sender<WorkflowEvent>, mpsc::Receiver<WorkflowEvent>) {
    mpsc::channel(EVENT_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_framing() {
        let event = WorkflowEvent::AgentStart {
            agent: "s1".into(),
        };
        let frame = event.to_sse();
        assert!(frame.starts_with("event: agent_start\ndata: "));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_step_serialization_skips_excluded_false() {
        let step = Step::new("n1", "gpt-4o-mini", "plan", "ok");
        let json = serde_json::to_value(&step).unwrap();
        assert!(json.get("excluded").is_none());

        let step = Step::excluded("n1", "image_generator", "not selected");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["excluded"], serde_json::json!(true));
        assert_eq!(json["agent_type"], serde_json::json!("image_generator"));
    }

    #[test]
    fn test_metadata_flattens() {
        let step = Step::new("n1", "m", "search", "found")
            .with_metadata("results_count", serde_json::json!(3));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["results_count"], serde_json::json!(3));
    }

    #[test]
    fn test_done_payload_tag() {
        let event = WorkflowEvent::Done(Box::new(DonePayload {
            answer: "hi".into(),
            tool_outputs: serde_json::json!({}),
            trace: Trace { steps: vec![] },
            latency_ms: 12,
            output_format: "text".into(),
        }));
        assert_eq!(event.tag(), "done");
        assert_eq!(event.payload()["answer"], serde_json::json!("hi"));
    }
}
