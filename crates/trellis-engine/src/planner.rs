use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{NodeCategory, NodeType, WorkflowEdge, WorkflowNode};

/// A node admitted by validation, with its resolved type.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node: WorkflowNode,
    pub node_type: NodeType,
}

impl PlannedNode {
    pub fn category(&self) -> NodeCategory {
        self.node_type.category()
    }
}

/// A validated execution plan: deterministic topological order over the
/// reachable subgraph plus predecessor/successor maps.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Reachable nodes in execution order.
    pub order: Vec<String>,
    /// Direct predecessors per node (reachable subgraph only).
    pub predecessors: HashMap<String, Vec<String>>,
    /// Direct successors per node (reachable subgraph only).
    pub successors: HashMap<String, Vec<String>>,
    /// Nodes never scheduled; converted to EXCLUDED before Done.
    pub unreachable: Vec<String>,
    /// All admitted nodes by id.
    pub nodes: HashMap<String, PlannedNode>,
    /// Non-fatal findings (e.g. no reachable output node).
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&PlannedNode> {
        self.nodes.get(id)
    }

    /// Transitive predecessors of a node within the reachable subgraph.
    pub fn ancestors(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .predecessors
            .get(id)
            .map(|preds| preds.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current.to_string()) {
                if let Some(preds) = self.predecessors.get(current) {
                    queue.extend(preds.iter().map(String::as_str));
                }
            }
        }
        seen
    }

    /// Transitive successors of a node within the reachable subgraph.
    pub fn descendants(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .successors
            .get(id)
            .map(|succs| succs.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current.to_string()) {
                if let Some(succs) = self.successors.get(current) {
                    queue.extend(succs.iter().map(String::as_str));
                }
            }
        }
        seen
    }
}

/// Validate a workflow graph and compute its execution plan.
///
/// Distinct failures: UnknownNodeType, DanglingEdge, Cycle. A graph with
/// no output reachable from an input is admitted with a warning.
pub fn plan(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Result<ExecutionPlan> {
    let mut planned: HashMap<String, PlannedNode> = HashMap::new();
    for node in nodes {
        let node_type = node.node_type().ok_or_else(|| {
            TrellisError::Validation(format!(
                "UnknownNodeType: node '{}' has type '{}'",
                node.id,
                node.raw_type()
            ))
        })?;
        if planned
            .insert(
                node.id.clone(),
                PlannedNode {
                    node: node.clone(),
                    node_type,
                },
            )
            .is_some()
        {
            return Err(TrellisError::Validation(format!(
                "DuplicateNodeId: '{}' appears more than once",
                node.id
            )));
        }
    }

    for edge in edges {
        for endpoint in [&edge.source, &edge.target] {
            if !planned.contains_key(endpoint) {
                return Err(TrellisError::Validation(format!(
                    "DanglingEdge: edge references missing node '{endpoint}'"
                )));
            }
        }
        if edge.source == edge.target {
            return Err(TrellisError::Validation(format!(
                "Cycle: node '{}' has a self-loop",
                edge.source
            )));
        }
    }

    // Cycle detection runs over the full graph so an unreachable cycle
    // still rejects the workflow.
    kahn_order(
        planned.keys().cloned().collect(),
        edges.iter().map(|e| (e.source.clone(), e.target.clone())),
    )
    .ok_or_else(|| TrellisError::Validation("Cycle: workflow graph contains a cycle".into()))?;

    // Entry points: input-category nodes plus anything with no incoming edge
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    let entries: HashSet<String> = planned
        .values()
        .filter(|p| p.category() == NodeCategory::Input || !targets.contains(p.node.id.as_str()))
        .map(|p| p.node.id.clone())
        .collect();

    // Forward reachability from the entry points
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        forward
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    let mut reachable: HashSet<String> = entries.clone();
    let mut queue: VecDeque<&str> = entries.iter().map(String::as_str).collect();
    while let Some(current) = queue.pop_front() {
        if let Some(nexts) = forward.get(current) {
            for next in nexts {
                if reachable.insert(next.to_string()) {
                    queue.push_back(next);
                }
            }
        }
    }

    let valid_edges: Vec<&WorkflowEdge> = edges
        .iter()
        .filter(|e| reachable.contains(&e.source) && reachable.contains(&e.target))
        .collect();

    let order = kahn_order(
        reachable.iter().cloned().collect(),
        valid_edges
            .iter()
            .map(|e| (e.source.clone(), e.target.clone())),
    )
    .expect("reachable subgraph of an acyclic graph is acyclic");

    let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &valid_edges {
        predecessors
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
        successors
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
    }
    for preds in predecessors.values_mut() {
        preds.sort();
        preds.dedup();
    }
    for succs in successors.values_mut() {
        succs.sort();
        succs.dedup();
    }

    let mut unreachable: Vec<String> = planned
        .keys()
        .filter(|id| !reachable.contains(*id))
        .cloned()
        .collect();
    unreachable.sort();

    let mut warnings = Vec::new();
    let output_reachable = planned
        .values()
        .any(|p| p.category() == NodeCategory::Output && reachable.contains(&p.node.id));
    if !planned.is_empty() && !output_reachable {
        let message = "NoReachableOutput: no output node is reachable from an input".to_string();
        warn!("{message}");
        warnings.push(message);
    }

    debug!(
        nodes = planned.len(),
        reachable = order.len(),
        unreachable = unreachable.len(),
        "Workflow plan computed"
    );

    Ok(ExecutionPlan {
        order,
        predecessors,
        successors,
        unreachable,
        nodes: planned,
        warnings,
    })
}

/// Kahn's algorithm with the ready set kept sorted by node id, so the
/// order is byte-identical across runs for the same input. Returns None
/// when a cycle prevents completion.
fn kahn_order(
    nodes: Vec<String>,
    edges: impl Iterator<Item = (String, String)>,
) -> Option<Vec<String>> {
    let node_set: HashSet<String> = nodes.iter().cloned().collect();
    let mut in_degree: HashMap<String, usize> =
        nodes.iter().map(|n| (n.clone(), 0usize)).collect();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for (source, target) in edges {
        if node_set.contains(&source) && node_set.contains(&target) {
            *in_degree.get_mut(&target).unwrap() += 1;
            adjacency.entry(source).or_default().push(target);
        }
    }

    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(nodes.len());
    while !ready.is_empty() {
        let next = ready.remove(0);
        if let Some(targets) = adjacency.get(&next) {
            for target in targets.clone() {
                let degree = in_degree.get_mut(&target).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    let pos = ready.binary_search(&target).unwrap_or_else(|p| p);
                    ready.insert(pos, target);
                }
            }
        }
        order.push(next);
    }

    if order.len() == nodes.len() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::NodeData;

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

    fn edge(source: &str, target: &str) -> WorkflowEdge {
        WorkflowEdge {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }

    #[test]
    fn test_linear_plan() {
        let nodes = vec![
            node("p1", "prompt"),
            node("s1", "semantic_search"),
            node("r1", "response"),
        ];
        let edges = vec![edge("p1", "s1"), edge("s1", "r1")];
        let plan = plan(&nodes, &edges).unwrap();
        assert_eq!(plan.order, vec!["p1", "s1", "r1"]);
        assert_eq!(plan.predecessors["r1"], vec!["s1"]);
        assert_eq!(plan.successors["p1"], vec!["s1"]);
        assert!(plan.unreachable.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let nodes = vec![node("x1", "teleporter")];
        let err = plan(&nodes, &[]).unwrap_err();
        assert!(err.to_string().contains("UnknownNodeType"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let nodes = vec![node("p1", "prompt")];
        let edges = vec![edge("p1", "ghost")];
        let err = plan(&nodes, &edges).unwrap_err();
        assert!(err.to_string().contains("DanglingEdge"));
    }

    #[test]
    fn test_cycle_rejected() {
        let nodes = vec![node("a", "synthesis"), node("b", "synthesis")];
        let edges = vec![edge("a", "b"), edge("b", "a")];
        let err = plan(&nodes, &edges).unwrap_err();
        assert!(err.to_string().contains("Cycle"));
    }

    #[test]
    fn test_self_loop_rejected() {
        let nodes = vec![node("a", "synthesis")];
        let edges = vec![edge("a", "a")];
        let err = plan(&nodes, &edges).unwrap_err();
        assert!(err.to_string().contains("Cycle"));
    }

    #[test]
    fn test_no_reachable_output_is_warning() {
        let nodes = vec![node("p1", "prompt"), node("y1", "synthesis")];
        let edges = vec![edge("p1", "y1")];
        let plan = plan(&nodes, &edges).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("NoReachableOutput"));
    }

    #[test]
    fn test_unreachable_subgraph_is_separated() {
        let nodes = vec![
            node("p1", "prompt"),
            node("r1", "response"),
            node("y1", "synthesis"),
            node("y2", "synthesis"),
        ];
        // y1 -> y2 hangs off no input; y1 has no incoming edge so it is
        // an entry point by the no-incoming rule
        let edges = vec![edge("p1", "r1"), edge("y1", "y2")];
        let plan = plan(&nodes, &edges).unwrap();
        assert!(plan.order.contains(&"y1".to_string()));
        assert!(plan.unreachable.is_empty());
    }

    #[test]
    fn test_deterministic_tie_break_by_id() {
        let nodes = vec![
            node("p1", "prompt"),
            node("b", "synthesis"),
            node("a", "synthesis"),
            node("c", "synthesis"),
        ];
        let edges = vec![edge("p1", "a"), edge("p1", "b"), edge("p1", "c")];
        for _ in 0..5 {
            let plan = plan(&nodes, &edges).unwrap();
            assert_eq!(plan.order, vec!["p1", "a", "b", "c"]);
        }
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let nodes = vec![
            node("p1", "prompt"),
            node("o1", "orchestrator"),
            node("s1", "semantic_search"),
            node("r1", "response"),
        ];
        let edges = vec![edge("p1", "o1"), edge("o1", "s1"), edge("s1", "r1")];
        let plan = plan(&nodes, &edges).unwrap();
        assert!(plan.ancestors("r1").contains("p1"));
        assert!(plan.descendants("o1").contains("r1"));
        assert!(!plan.descendants("o1").contains("p1"));
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let nodes = vec![node("a", "prompt"), node("a", "response")];
        let err = plan(&nodes, &[]).unwrap_err();
        assert!(err.to_string().contains("DuplicateNodeId"));
    }
}
