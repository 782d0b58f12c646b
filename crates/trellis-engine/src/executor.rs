use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trellis_agents::{AgentInput, AgentRegistry};
use trellis_core::config::EngineConfig;
use trellis_core::context::{keys, ContextStore};
use trellis_core::error::{Result, TrellisError};
use trellis_core::event::{DonePayload, Step, Trace, WorkflowEvent};
use trellis_core::traits::{DocumentExtractor, ModelGateway};
use trellis_core::types::{effective_model_class, NodeCategory, NodeState, NodeType};

use crate::inputs;
use crate::outputs;
use crate::planner::{ExecutionPlan, PlannedNode};

/// Drives a validated plan: input extraction, exclusion policy, agent
/// invocation, output finalisation and event emission.
pub struct ExecutionEngine {
    registry: Arc<AgentRegistry>,
    gateway: Arc<dyn ModelGateway>,
    extractor: Arc<dyn DocumentExtractor>,
}

/// Per-run bookkeeping.
struct RunState {
    states: HashMap<String, NodeState>,
    trace: Vec<Step>,
    /// `selected_tools` sets published so far, by publishing node.
    routing: Vec<(String, HashSet<String>)>,
    /// The most recently finalised output node and its payload.
    last_output: Option<(NodeType, String)>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        gateway: Arc<dyn ModelGateway>,
        extractor: Arc<dyn DocumentExtractor>,
        config: &EngineConfig,
    ) -> Self {
        if config.max_parallel_agents > 1 {
            warn!(
                configured = config.max_parallel_agents,
                "Bounded parallel scheduling is not enabled in this build; running sequentially"
            );
        }
        Self {
            registry,
            gateway,
            extractor,
        }
    }

    /// Execute one run, streaming events until Done, Error or
    /// cancellation. On cancellation the stream closes without a
    /// terminal event.
    pub async fn run(
        &self,
        message: String,
        plan: ExecutionPlan,
        events: mpsc::Sender<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let mut context = ContextStore::new();
        context.set_str(keys::USER_MESSAGE, &message);

        let mut run = RunState {
            states: plan
                .nodes
                .keys()
                .map(|id| (id.clone(), NodeState::Pending))
                .collect(),
            trace: Vec::new(),
            routing: Vec::new(),
            last_output: None,
        };

        for node_id in plan.order.clone() {
            if cancel.is_cancelled() {
                debug!(node_id, "Run cancelled before scheduling");
                return Err(TrellisError::Cancelled);
            }
            let planned = plan
                .node(&node_id)
                .cloned()
                .ok_or_else(|| TrellisError::Internal(format!("planned node '{node_id}' missing")))?;

            let outcome = self
                .process_node(&planned, &plan, &mut context, &mut run, &events, &cancel)
                .await;

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    // fatal agent failure already surfaced as an Error event
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        // Nodes never scheduled settle as EXCLUDED before Done
        for node_id in &plan.unreachable {
            run.states.insert(node_id.clone(), NodeState::Excluded);
        }

        let (answer, format) = self.finalise(&plan, &context, &run);
        let done = DonePayload {
            answer,
            tool_outputs: context.tool_outputs(),
            trace: Trace {
                steps: run.trace.clone(),
            },
            latency_ms: started.elapsed().as_millis() as u64,
            output_format: format,
        };
        info!(
            steps = done.trace.steps.len(),
            latency_ms = done.latency_ms,
            "Workflow run complete"
        );
        emit(&events, &cancel, WorkflowEvent::Done(Box::new(done))).await?;
        Ok(())
    }

    /// Process one node. Returns Ok(false) when a fatal agent error ended
    /// the run, Err only for cancellation or internal failures.
    async fn process_node(
        &self,
        planned: &PlannedNode,
        plan: &ExecutionPlan,
        context: &mut ContextStore,
        run: &mut RunState,
        events: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let node_id = planned.node.id.clone();

        if let Some(reason) = exclusion_reason(planned, plan, run) {
            debug!(node_id, reason, "Node excluded");
            run.states.insert(node_id.clone(), NodeState::Excluded);
            let step = Step::excluded(&node_id, planned.node_type.as_str(), reason);
            run.trace.push(step.clone());
            emit(events, cancel, WorkflowEvent::AgentStart { agent: node_id.clone() }).await?;
            emit(
                events,
                cancel,
                WorkflowEvent::AgentComplete {
                    agent: node_id,
                    step,
                },
            )
            .await?;
            return Ok(true);
        }

        match planned.category() {
            NodeCategory::Input => {
                emit(events, cancel, WorkflowEvent::AgentStart { agent: node_id.clone() }).await?;
                let step = match planned.node_type {
                    NodeType::Prompt => inputs::handle_prompt_node(planned, context),
                    _ => inputs::handle_upload_node(planned, plan, context, self.extractor.as_ref()),
                };
                run.states.insert(node_id.clone(), NodeState::Executed);
                run.trace.push(step.clone());
                emit(
                    events,
                    cancel,
                    WorkflowEvent::AgentComplete { agent: node_id, step },
                )
                .await?;
                Ok(true)
            }
            NodeCategory::Output => {
                emit(events, cancel, WorkflowEvent::AgentStart { agent: node_id.clone() }).await?;
                let payload = match planned.node_type {
                    NodeType::Spreadsheet => outputs::select_spreadsheet_payload(context, &run.trace),
                    _ => outputs::select_final_answer(context, &run.trace),
                };
                run.last_output = Some((planned.node_type, payload.clone()));
                let step = Step::new(&node_id, "none", "output", payload);
                run.states.insert(node_id.clone(), NodeState::Executed);
                run.trace.push(step.clone());
                emit(
                    events,
                    cancel,
                    WorkflowEvent::AgentComplete { agent: node_id, step },
                )
                .await?;
                Ok(true)
            }
            NodeCategory::Agent | NodeCategory::Tool => {
                self.invoke_agent(planned, plan, context, run, events, cancel)
                    .await
            }
        }
    }

    async fn invoke_agent(
        &self,
        planned: &PlannedNode,
        plan: &ExecutionPlan,
        context: &mut ContextStore,
        run: &mut RunState,
        events: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let node_id = planned.node.id.clone();

        let Some(agent) = self.registry.get(planned.node_type) else {
            return Err(TrellisError::Internal(format!(
                "no handler registered for node type '{}'",
                planned.node_type
            )));
        };

        run.states.insert(node_id.clone(), NodeState::Running);
        emit(events, cancel, WorkflowEvent::AgentStart { agent: node_id.clone() }).await?;

        // Engine-provided context the planner-aware agents consume
        match planned.node_type {
            NodeType::Supervisor => {
                let mut downstream: Vec<String> = plan.descendants(&node_id).into_iter().collect();
                downstream.sort();
                context.set(keys::DOWNSTREAM_NODES, serde_json::json!(downstream));
            }
            NodeType::Orchestrator => {
                let mut tools: Vec<serde_json::Value> = plan
                    .descendants(&node_id)
                    .into_iter()
                    .filter_map(|id| {
                        let p = plan.node(&id)?;
                        (p.category() == NodeCategory::Tool).then(|| {
                            serde_json::json!({"id": id, "type": p.node_type.as_str()})
                        })
                    })
                    .collect();
                tools.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
                context.set(keys::AVAILABLE_TOOLS, serde_json::json!(tools));
            }
            _ => {}
        }

        let settings = planned.node.settings();
        let model_class = effective_model_class(&settings, agent.default_model());
        let model_label = agent
            .model_label_override()
            .map(String::from)
            .unwrap_or_else(|| self.gateway.model_label(model_class));

        let input = AgentInput {
            user_message: context
                .get_str(keys::USER_MESSAGE)
                .unwrap_or_default()
                .to_string(),
            context: context.snapshot(),
            settings,
            model_class,
        };

        match agent.execute(input).await {
            Ok(result) => {
                // documented keys must hold their documented shapes
                if let Err(message) = trellis_core::context::validate_types(&result.context_updates)
                {
                    error!(node_id, message, "Context contract violated, terminating run");
                    run.states.insert(node_id.clone(), NodeState::Error);
                    emit(events, cancel, WorkflowEvent::Error { message }).await?;
                    return Ok(false);
                }
                if let Some(selection) = result.context_updates.get(keys::SELECTED_TOOLS) {
                    let set: HashSet<String> = selection
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    run.routing.push((node_id.clone(), set));
                }
                context.merge(result.context_updates);

                let mut step = Step::new(&node_id, &model_label, &result.action, &result.content);
                step.metadata.extend(result.metadata);
                run.states.insert(node_id.clone(), NodeState::Executed);
                run.trace.push(step.clone());
                emit(
                    events,
                    cancel,
                    WorkflowEvent::AgentComplete { agent: node_id, step },
                )
                .await?;
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                warn!(node_id, error = %e, "Agent failed recoverably");
                let step = Step::new(&node_id, &model_label, "error", "")
                    .with_metadata("error", serde_json::json!(e.to_string()));
                run.states.insert(node_id.clone(), NodeState::Error);
                run.trace.push(step.clone());
                emit(
                    events,
                    cancel,
                    WorkflowEvent::AgentComplete { agent: node_id, step },
                )
                .await?;
                Ok(true)
            }
            Err(e) => {
                error!(node_id, error = %e, "Agent failed fatally, terminating run");
                run.states.insert(node_id.clone(), NodeState::Error);
                emit(
                    events,
                    cancel,
                    WorkflowEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await?;
                Ok(false)
            }
        }
    }

    fn finalise(
        &self,
        plan: &ExecutionPlan,
        context: &ContextStore,
        run: &RunState,
    ) -> (String, String) {
        if plan.order.is_empty() {
            return (String::new(), "text".to_string());
        }
        let (output_type, answer) = match &run.last_output {
            Some((node_type, payload)) => (Some(*node_type), payload.clone()),
            None => (None, outputs::select_final_answer(context, &run.trace)),
        };
        let format = outputs::output_format(output_type, &answer);
        (answer, format)
    }
}

/// Why a node should be EXCLUDED before scheduling, if it should.
///
/// Tool-category nodes are gated by `selected_tools` sets published by
/// their ancestors. Any node with non-input predecessors is excluded when
/// none of them EXECUTED; a join with at least one executed predecessor
/// proceeds.
fn exclusion_reason(
    planned: &PlannedNode,
    plan: &ExecutionPlan,
    run: &RunState,
) -> Option<String> {
    let node_id = &planned.node.id;

    if planned.category() == NodeCategory::Tool && !run.routing.is_empty() {
        let ancestors = plan.ancestors(node_id);
        let gating: Vec<&(String, HashSet<String>)> = run
            .routing
            .iter()
            .filter(|(publisher, _)| ancestors.contains(publisher))
            .collect();
        if !gating.is_empty() && !gating.iter().any(|(_, set)| set.contains(node_id)) {
            return Some("Excluded (not selected by orchestrator)".to_string());
        }
    }

    let non_input_preds: Vec<&String> = plan
        .predecessors
        .get(node_id)
        .map(|preds| {
            preds
                .iter()
                .filter(|p| {
                    plan.node(p)
                        .map(|planned| planned.category() != NodeCategory::Input)
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();

    if !non_input_preds.is_empty()
        && non_input_preds.iter().all(|p| {
            matches!(
                run.states.get(p.as_str()),
                Some(NodeState::Excluded) | Some(NodeState::Error)
            )
        })
    {
        return Some("Excluded (all upstream steps excluded or failed)".to_string());
    }

    None
}

/// Emit one event, honoring cancellation both before the send and when
/// the consumer has gone away.
async fn emit(
    events: &mpsc::Sender<WorkflowEvent>,
    cancel: &CancellationToken,
    event: WorkflowEvent,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TrellisError::Cancelled);
    }
    events
        .send(event)
        .await
        .map_err(|_| TrellisError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use trellis_agents::{Agent, AgentResult};
    use trellis_core::event::event_channel;
    use trellis_core::traits::TextExtractor;
    use trellis_core::types::{ChatMessage, ChatOptions, ModelClass, NodeData, WorkflowEdge, WorkflowNode};

    use crate::planner;

    struct NullGateway;

    impl ModelGateway for NullGateway {
        fn chat(
            &self,
            _class: ModelClass,
            _messages: Vec<ChatMessage>,
            _options: ChatOptions,
        ) -> BoxFuture<'_, Result<String>> {
            Box::pin(async { Ok("stub".into()) })
        }

        fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            Box::pin(async move { Ok(vec![vec![1.0]; texts.len()]) })
        }

        fn model_label(&self, class: ModelClass) -> String {
            match class {
                ModelClass::Small => "stub-small".into(),
                ModelClass::Large => "stub-large".into(),
            }
        }
    }

    /// Agent returning a canned result, optionally failing.
    struct CannedAgent {
        result: AgentResult,
        error: Option<fn() -> TrellisError>,
    }

    impl Agent for CannedAgent {
        fn execute(&self, _input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
            let result = self.result.clone();
            let error = self.error;
            Box::pin(async move {
                match error {
                    Some(make) => Err(make()),
                    None => Ok(result),
                }
            })
        }
    }

    fn node(id: &str, node_type: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            kind: None,
            position: None,
            data: NodeData {
                node_type: Some(node_type.into()),
                ..NodeData::default()
            },
        }
    }

    fn prompt_node(id: &str, text: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            kind: None,
            position: None,
            data: NodeData {
                node_type: Some("prompt".into()),
                prompt_text: Some(text.into()),
                ..NodeData::default()
            },
        }
    }

    fn edge(source: &str, target: &str) -> WorkflowEdge {
        WorkflowEdge {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }

    fn engine(registry: AgentRegistry) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(registry),
            Arc::new(NullGateway),
            Arc::new(TextExtractor),
            &EngineConfig::default(),
        )
    }

    async fn collect_events(
        engine: ExecutionEngine,
        message: &str,
        plan: ExecutionPlan,
    ) -> Vec<WorkflowEvent> {
        let (tx, mut rx) = event_channel();
        let cancel = CancellationToken::new();
        let message = message.to_string();
        let handle = tokio::spawn(async move {
            engine.run(message, plan, tx, cancel).await
        });
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap().unwrap();
        events
    }

    fn done_of(events: &[WorkflowEvent]) -> &DonePayload {
        match events.last().expect("no events") {
            WorkflowEvent::Done(payload) => payload,
            other => panic!("expected Done, got {}", other.tag()),
        }
    }

    #[tokio::test]
    async fn test_empty_graph_yields_empty_done() {
        let plan = planner::plan(&[], &[]).unwrap();
        let events = collect_events(engine(AgentRegistry::new()), "hi", plan).await;
        assert_eq!(events.len(), 1);
        let done = done_of(&events);
        assert_eq!(done.answer, "");
        assert!(done.trace.steps.is_empty());
    }

    #[tokio::test]
    async fn test_pass_through_prompt() {
        let plan = planner::plan(
            &[prompt_node("p1", "Hello"), node("r1", "response")],
            &[edge("p1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(AgentRegistry::new()), "ignored", plan).await;

        let done = done_of(&events);
        assert_eq!(done.answer, "Hello");
        // no non-input, non-output steps
        assert!(done
            .trace
            .steps
            .iter()
            .all(|s| s.action == "input" || s.action == "output"));
    }

    #[tokio::test]
    async fn test_start_complete_pairing_and_order() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                result: AgentResult::new("synthesize", "done").with_update(
                    keys::FINAL_ANSWER,
                    serde_json::json!("done"),
                ),
                error: None,
            },
        );
        let plan = planner::plan(
            &[
                prompt_node("p1", "q"),
                node("y1", "synthesis"),
                node("r1", "response"),
            ],
            &[edge("p1", "y1"), edge("y1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;

        let mut starts = Vec::new();
        let mut completes = Vec::new();
        for event in &events {
            match event {
                WorkflowEvent::AgentStart { agent } => starts.push(agent.clone()),
                WorkflowEvent::AgentComplete { agent, .. } => completes.push(agent.clone()),
                _ => {}
            }
        }
        let mut sorted_starts = starts.clone();
        sorted_starts.sort();
        let mut sorted_completes = completes.clone();
        sorted_completes.sort();
        assert_eq!(sorted_starts, sorted_completes);
        // per-edge ordering: all of p1's events precede y1's AgentStart
        assert_eq!(starts, vec!["p1", "y1", "r1"]);
        assert!(matches!(events.last(), Some(WorkflowEvent::Done(_))));
    }

    #[tokio::test]
    async fn test_branch_routing_excludes_unselected_tool() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Orchestrator,
            CannedAgent {
                result: AgentResult::new("route", "Selected tools: s1")
                    .with_update(keys::SELECTED_TOOLS, serde_json::json!(["s1"])),
                error: None,
            },
        );
        registry.register(
            NodeType::SemanticSearch,
            CannedAgent {
                result: AgentResult::new("search", "found docs").with_update(
                    keys::SEMANTIC_RESULTS,
                    serde_json::json!([{"title": "doc", "snippet": "text", "score": 0.9}]),
                ),
                error: None,
            },
        );
        registry.register(
            NodeType::ImageGenerator,
            CannedAgent {
                result: AgentResult::new("generate_image", "should not run"),
                error: None,
            },
        );
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                result: AgentResult::new("synthesize", "synthesis over semantic_results")
                    .with_update(keys::FINAL_ANSWER, serde_json::json!("synthesized")),
                error: None,
            },
        );

        let plan = planner::plan(
            &[
                prompt_node("p1", "q"),
                node("o1", "orchestrator"),
                node("s1", "semantic_search"),
                node("i1", "image_generator"),
                node("y1", "synthesis"),
                node("r1", "response"),
            ],
            &[
                edge("p1", "o1"),
                edge("o1", "s1"),
                edge("o1", "i1"),
                edge("s1", "y1"),
                edge("i1", "y1"),
                edge("y1", "r1"),
            ],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;

        let done = done_of(&events);
        let i1_step = done
            .trace
            .steps
            .iter()
            .find(|s| s.agent == "i1")
            .expect("i1 step recorded");
        assert!(i1_step.excluded);

        let s1_step = done.trace.steps.iter().find(|s| s.agent == "s1").unwrap();
        assert!(!s1_step.excluded);
        // the join proceeds: y1 executed despite the excluded i1 branch
        let y1_step = done.trace.steps.iter().find(|s| s.agent == "y1").unwrap();
        assert_eq!(y1_step.action, "synthesize");
        assert_eq!(done.answer, "synthesized");
    }

    #[tokio::test]
    async fn test_orchestrator_selecting_nothing_excludes_all_tools() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Orchestrator,
            CannedAgent {
                result: AgentResult::new("route", "No tools selected.")
                    .with_update(keys::SELECTED_TOOLS, serde_json::json!([])),
                error: None,
            },
        );
        registry.register(
            NodeType::SemanticSearch,
            CannedAgent {
                result: AgentResult::new("search", "should not run"),
                error: None,
            },
        );
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                result: AgentResult::new("synthesize", "still ran")
                    .with_update(keys::FINAL_ANSWER, serde_json::json!("still ran")),
                error: None,
            },
        );

        let plan = planner::plan(
            &[
                prompt_node("p1", "q"),
                node("o1", "orchestrator"),
                node("s1", "semantic_search"),
                node("y1", "synthesis"),
                node("r1", "response"),
            ],
            &[
                edge("p1", "o1"),
                edge("o1", "s1"),
                edge("o1", "y1"),
                edge("s1", "y1"),
                edge("y1", "r1"),
            ],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;
        let done = done_of(&events);

        assert!(done.trace.steps.iter().find(|s| s.agent == "s1").unwrap().excluded);
        // the remaining path still executes
        assert_eq!(done.answer, "still ran");
    }

    #[tokio::test]
    async fn test_recoverable_error_continues_run() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Sampler,
            CannedAgent {
                result: AgentResult::default(),
                error: Some(|| TrellisError::Provider("provider timed out".into())),
            },
        );
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                result: AgentResult::new("synthesize", "recovered")
                    .with_update(keys::FINAL_ANSWER, serde_json::json!("recovered")),
                error: None,
            },
        );

        let plan = planner::plan(
            &[
                prompt_node("p1", "q"),
                node("a1", "sampler"),
                node("y1", "synthesis"),
                node("r1", "response"),
            ],
            &[edge("p1", "a1"), edge("a1", "y1"), edge("y1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;
        let done = done_of(&events);

        let failed = done.trace.steps.iter().find(|s| s.agent == "a1").unwrap();
        assert_eq!(failed.action, "error");
        assert_eq!(failed.content, "");
        assert!(failed.metadata.contains_key("error"));
        assert_eq!(done.answer, "recovered");
    }

    #[tokio::test]
    async fn test_fatal_error_terminates_with_error_event() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                result: AgentResult::default(),
                error: Some(|| TrellisError::FatalAgent {
                    agent: "y1".into(),
                    message: "context key type mismatch".into(),
                }),
            },
        );

        let plan = planner::plan(
            &[prompt_node("p1", "q"), node("y1", "synthesis"), node("r1", "response")],
            &[edge("p1", "y1"), edge("y1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;

        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Error { .. })
        ));
        // r1 never started
        assert!(!events.iter().any(|e| matches!(
            e,
            WorkflowEvent::AgentStart { agent } if agent == "r1"
        )));
    }

    #[tokio::test]
    async fn test_failed_predecessors_exclude_downstream() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Sampler,
            CannedAgent {
                result: AgentResult::default(),
                error: Some(|| TrellisError::Provider("down".into())),
            },
        );
        registry.register(
            NodeType::Formatting,
            CannedAgent {
                result: AgentResult::new("format", "should be excluded"),
                error: None,
            },
        );

        // a1 fails; f1 depends only on a1, so f1 is excluded
        let plan = planner::plan(
            &[
                prompt_node("p1", "q"),
                node("a1", "sampler"),
                node("f1", "formatting"),
                node("r1", "response"),
            ],
            &[edge("p1", "a1"), edge("a1", "f1"), edge("f1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;
        let done = done_of(&events);

        assert!(done.trace.steps.iter().find(|s| s.agent == "f1").unwrap().excluded);
    }

    #[tokio::test]
    async fn test_context_type_mismatch_is_fatal() {
        let mut registry = AgentRegistry::new();
        registry.register(
            NodeType::Synthesis,
            CannedAgent {
                // final_answer must be a string
                result: AgentResult::new("synthesize", "bad").with_update(
                    keys::FINAL_ANSWER,
                    serde_json::json!({"nested": true}),
                ),
                error: None,
            },
        );
        let plan = planner::plan(
            &[prompt_node("p1", "q"), node("y1", "synthesis"), node("r1", "response")],
            &[edge("p1", "y1"), edge("y1", "r1")],
        )
        .unwrap();
        let events = collect_events(engine(registry), "q", plan).await;
        assert!(matches!(events.last(), Some(WorkflowEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_deterministic_replay() {
        let build = || {
            let mut registry = AgentRegistry::new();
            registry.register(
                NodeType::Synthesis,
                CannedAgent {
                    result: AgentResult::new("synthesize", "stable answer")
                        .with_update(keys::FINAL_ANSWER, serde_json::json!("stable answer")),
                    error: None,
                },
            );
            registry
        };
        let make_plan = || {
            planner::plan(
                &[prompt_node("p1", "q"), node("y1", "synthesis"), node("r1", "response")],
                &[edge("p1", "y1"), edge("y1", "r1")],
            )
            .unwrap()
        };

        let first = collect_events(engine(build()), "q", make_plan()).await;
        let second = collect_events(engine(build()), "q", make_plan()).await;

        let first_done = done_of(&first);
        let second_done = done_of(&second);
        assert_eq!(first_done.answer, second_done.answer);
        let contents: Vec<_> = first_done.trace.steps.iter().map(|s| &s.content).collect();
        let contents2: Vec<_> = second_done.trace.steps.iter().map(|s| &s.content).collect();
        assert_eq!(contents, contents2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_event_flow() {
        struct SlowAgent;
        impl Agent for SlowAgent {
            fn execute(&self, _input: AgentInput) -> BoxFuture<'_, Result<AgentResult>> {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok(AgentResult::new("synthesize", "late"))
                })
            }
        }
        let mut registry = AgentRegistry::new();
        registry.register(NodeType::Synthesis, SlowAgent);

        let plan = planner::plan(
            &[prompt_node("p1", "q"), node("y1", "synthesis"), node("r1", "response")],
            &[edge("p1", "y1"), edge("y1", "r1")],
        )
        .unwrap();

        let (tx, mut rx) = event_channel();
        let cancel = CancellationToken::new();
        let engine = engine(registry);
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            engine.run("q".into(), plan, tx, run_cancel).await
        });

        // wait for y1 to start, then cancel mid-flight
        let mut saw_y1_start = false;
        while let Some(event) = rx.recv().await {
            if matches!(&event, WorkflowEvent::AgentStart { agent } if agent == "y1") {
                saw_y1_start = true;
                cancel.cancel();
                break;
            }
        }
        assert!(saw_y1_start);

        // nothing further arrives: no complete for y1, no events for r1,
        // no terminal event
        assert!(rx.recv().await.is_none());
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TrellisError::Cancelled)));
    }
}
