use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::traits::ModelGateway;
use trellis_core::types::NodeType;

use trellis_llm::ImageClient;
use trellis_retrieval::Retriever;

use crate::code::CodeAgent;
use crate::formatting::FormattingAgent;
use crate::image_generator::ImageGeneratorAgent;
use crate::orchestrator::OrchestratorAgent;
use crate::sampler::SamplerAgent;
use crate::semantic_search::SemanticSearchAgent;
use crate::summarization::SummarizationAgent;
use crate::supervisor::SupervisorAgent;
use crate::synthesis::SynthesisAgent;
use crate::transformer::TransformerAgent;
use crate::translator::TranslatorAgent;
use crate::Agent;

/// Maps node types of category agent/tool to their handlers. Input and
/// output nodes have no handler; the engine processes them directly.
pub struct AgentRegistry {
    agents: HashMap<NodeType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, node_type: NodeType, agent: impl Agent) {
        self.agents.insert(node_type, Arc::new(agent));
    }

    pub fn register_arc(&mut self, node_type: NodeType, agent: Arc<dyn Agent>) {
        self.agents.insert(node_type, agent);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&node_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<NodeType> {
        self.agents.keys().copied().collect()
    }

    /// Registry with every built-in agent wired to the shared services.
    pub fn with_builtins(
        gateway: Arc<dyn ModelGateway>,
        retriever: Arc<Retriever>,
        images: Arc<ImageClient>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Supervisor, SupervisorAgent::new(gateway.clone()));
        registry.register(
            NodeType::Orchestrator,
            OrchestratorAgent::new(gateway.clone()),
        );
        registry.register(
            NodeType::SemanticSearch,
            SemanticSearchAgent::new(retriever),
        );
        registry.register(NodeType::Sampler, SamplerAgent::new(gateway.clone()));
        registry.register(NodeType::Synthesis, SynthesisAgent::new(gateway.clone()));
        registry.register(
            NodeType::Summarization,
            SummarizationAgent::new(gateway.clone()),
        );
        registry.register(NodeType::Formatting, FormattingAgent::new(gateway.clone()));
        registry.register(
            NodeType::Transformer,
            TransformerAgent::new(gateway.clone()),
        );
        registry.register(NodeType::Translator, TranslatorAgent::new(gateway.clone()));
        registry.register(
            NodeType::ImageGenerator,
            ImageGeneratorAgent::new(gateway.clone(), images),
        );
        registry.register(NodeType::Code, CodeAgent::new(gateway));
        registry
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
