//! Block dependency graphs, cycle detection, and wave computation.
//!
//! Every block of sibling nodes (the top-level task list, a parallel group,
//! a branch, a loop body) forms its own DAG from `depends_on`. `petgraph`
//! models each block: topological sort proves acyclicity, strongly connected
//! components name the ids on a cycle, and depth grouping produces the waves
//! shown by `tesflow validate`.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tesflow_types::workflow::TaskNode;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Block graph
// ---------------------------------------------------------------------------

/// Index-based dependency structure of one block, used by the scheduler.
///
/// Indices refer to positions in the block slice it was built from.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    /// Dependencies of each node.
    pub dependencies: Vec<Vec<usize>>,
}

impl BlockGraph {
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Build the dependency graph of a block, rejecting unknown ids and cycles.
pub fn build_block_graph(nodes: &[TaskNode]) -> Result<BlockGraph, WorkflowError> {
    let (graph, indices) = to_digraph(nodes)?;
    check_acyclic(&graph, nodes)?;

    let mut dependencies = vec![Vec::new(); nodes.len()];
    for edge in graph.raw_edges() {
        dependencies[indices[&edge.target()]].push(indices[&edge.source()]);
    }
    for list in &mut dependencies {
        list.sort_unstable();
        list.dedup();
    }

    Ok(BlockGraph { dependencies })
}

/// Validate that a block forms a DAG (no cycles, all references exist).
pub fn validate_block(nodes: &[TaskNode]) -> Result<(), WorkflowError> {
    let (graph, _) = to_digraph(nodes)?;
    check_acyclic(&graph, nodes)
}

fn to_digraph(
    nodes: &[TaskNode],
) -> Result<(DiGraph<usize, ()>, HashMap<NodeIndex, usize>), WorkflowError> {
    let id_to_pos: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    // Edge from dependency -> dependent
    let mut graph = DiGraph::<usize, ()>::new();
    let node_indices: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();

    for (to_pos, node) in nodes.iter().enumerate() {
        for dep in &node.depends_on {
            let from_pos = id_to_pos.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency {
                    task_id: node.id.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(node_indices[*from_pos], node_indices[to_pos], ());
        }
    }

    let positions = node_indices
        .iter()
        .enumerate()
        .map(|(pos, idx)| (*idx, pos))
        .collect();
    Ok((graph, positions))
}

/// Run a topological sort; on failure, report every id on the offending cycle
/// in declaration order.
fn check_acyclic(graph: &DiGraph<usize, ()>, nodes: &[TaskNode]) -> Result<(), WorkflowError> {
    let Err(cycle) = toposort(graph, None) else {
        return Ok(());
    };

    let culprit = cycle.node_id();
    let mut members: Vec<usize> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&culprit))
        .map(|scc| scc.into_iter().map(|idx| graph[idx]).collect())
        .unwrap_or_else(|| vec![graph[culprit]]);
    members.sort_unstable();

    Err(WorkflowError::CycleDetected {
        cycle: members.into_iter().map(|pos| nodes[pos].id.clone()).collect(),
    })
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group a block's nodes into waves that could run concurrently.
///
/// Each wave contains nodes whose dependencies are all in earlier waves:
/// a node's depth is one more than its deepest dependency, roots sit at 0.
pub fn build_execution_plan(nodes: &[TaskNode]) -> Result<Vec<Vec<&TaskNode>>, WorkflowError> {
    if nodes.is_empty() {
        return Ok(vec![]);
    }

    let (graph, indices) = to_digraph(nodes)?;
    check_acyclic(&graph, nodes)?;
    let sorted = toposort(&graph, None).map_err(|_| WorkflowError::CycleDetected {
        cycle: Vec::new(),
    })?;

    let mut depths = vec![0usize; nodes.len()];
    for idx in sorted {
        let pos = indices[&idx];
        let depth = graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|dep| depths[indices[&dep]] + 1)
            .max()
            .unwrap_or(0);
        depths[pos] = depth;
    }

    let max_depth = depths.iter().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&TaskNode>> = vec![vec![]; max_depth + 1];
    for (pos, node) in nodes.iter().enumerate() {
        waves[depths[pos]].push(node);
    }
    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
