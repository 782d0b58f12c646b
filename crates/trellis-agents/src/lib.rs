pub mod registry;
pub mod util;

mod code;
mod formatting;
mod image_generator;
mod orchestrator;
mod sampler;
mod semantic_search;
mod summarization;
mod supervisor;
mod synthesis;
mod transformer;
mod translator;

use futures::future::BoxFuture;

use trellis_core::error::Result;
use trellis_core::types::{ContextData, ModelClass};

pub use registry::AgentRegistry;

/// Everything an agent sees for one invocation: the user message, a
/// context snapshot taken when the call starts, the node's settings and
/// the resolved model class.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub user_message: String,
    pub context: ContextData,
    pub settings: serde_json::Value,
    pub model_class: ModelClass,
}

impl AgentInput {
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_usize(&self, key: &str, default: usize) -> usize {
        self.settings
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(default)
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        self.settings
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

/// What an agent hands back: an action tag, the textual output, metadata
/// surfaced on the event bus, and context updates the engine merges after
/// the call returns.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub action: String,
    pub content: String,
    pub metadata: ContextData,
    pub context_updates: ContextData,
}

impl AgentResult {
    pub fn new(action: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_update(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use futures::future::BoxFuture;

    use trellis_core::config::{
        AppConfig, EngineConfig, ImageProvider, ModelConfig, Provider, RetrievalConfig,
    };
    use trellis_core::error::Result;
    use trellis_core::traits::ModelGateway;
    use trellis_core::types::{ChatMessage, ChatOptions, ContextData, ModelClass};

    use crate::AgentInput;

    /// Gateway stub for handler tests: canned reply, records the last
    /// prompt it was sent.
    pub(crate) struct StubGateway {
        reply: String,
        last_prompt: Mutex<Option<String>>,
    }

    impl StubGateway {
        pub(crate) fn new(reply: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                last_prompt: Mutex::new(None),
            })
        }

        pub(crate) fn prompt(&self) -> String {
            self.last_prompt
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_default()
        }
    }

    impl ModelGateway for StubGateway {
        fn chat(
            &self,
            _class: ModelClass,
            messages: Vec<ChatMessage>,
            _options: ChatOptions,
        ) -> BoxFuture<'_, Result<String>> {
            *self.last_prompt.lock().unwrap() = messages.last().map(|m| m.content.clone());
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }

        fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            Box::pin(async move { Ok(vec![vec![1.0, 0.0]; texts.len()]) })
        }

        fn model_label(&self, _class: ModelClass) -> String {
            "stub".into()
        }
    }

    pub(crate) fn agent_input(
        message: &str,
        context: ContextData,
        settings: serde_json::Value,
    ) -> AgentInput {
        AgentInput {
            user_message: message.to_string(),
            context,
            settings,
            model_class: ModelClass::Small,
        }
    }

    pub(crate) fn test_config() -> AppConfig {
        AppConfig {
            provider: Provider::OpenAi,
            models: ModelConfig {
                small: "stub-small".into(),
                large: "stub-large".into(),
                embedding: "stub-embed".into(),
            },
            image_provider: ImageProvider::NanoBanana,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            anthropic_api_key: None,
            google_api_key: None,
            ollama_base_url: "http://localhost:11434".into(),
            host: "127.0.0.1".into(),
            port: 0,
            database_url: None,
            retrieval: RetrievalConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// A single step of a workflow executed against the shared context.
///
/// Recoverable failures are returned as `Err` with a recoverable error
/// kind; the engine records them in the step and continues the run.
pub trait Agent: Send + Sync + 'static {
    /// Model class used when node settings don't override it.
    fn default_model(&self) -> ModelClass {
        ModelClass::Small
    }

    /// Step model label override for agents that don't chat (e.g. the
    /// embedding-backed search agent).
    fn model_label_override(&self) -> Option<&'static str> {
        None
    }

    fn execute(&self, input: AgentInput) -> BoxFuture<'_, Result<AgentResult>>;
}
