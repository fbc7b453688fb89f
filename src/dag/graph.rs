// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::task::{TaskId, TaskSpec};

/// The resolved, validated task graph for one pipeline invocation.
///
/// Specs are interned by identity, so shared dependencies (two sibling
/// tasks both requiring the same `normalize-stations`) are represented
/// once. Node indices follow first-seen order during expansion, which
/// makes the topological order deterministic across runs.
#[derive(Debug)]
pub struct TaskGraph {
    specs: HashMap<TaskId, TaskSpec>,
    indices: HashMap<TaskId, NodeIndex>,
    graph: DiGraph<TaskId, ()>,
    /// Topological execution order: dependencies strictly before
    /// dependents, ties broken first-seen-first.
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Expand the transitive dependency closure of `roots` against the
    /// config and produce an execution order.
    ///
    /// Expansion is depth-first; every `(kind, params)` identity is
    /// built at most once. Construction errors (unknown city, missing
    /// parameter) surface before anything executes.
    pub fn resolve(roots: &[TaskId], cfg: &Config) -> Result<Self> {
        let mut specs: Vec<TaskSpec> = Vec::new();
        let mut seen: HashMap<TaskId, ()> = HashMap::new();
        let mut stack: Vec<TaskId> = roots.iter().rev().cloned().collect();

        while let Some(id) = stack.pop() {
            if seen.contains_key(&id) {
                continue;
            }
            let spec = TaskSpec::build(id.kind, &id.params, cfg)?;
            seen.insert(spec.id.clone(), ());
            // push deps in reverse so they are visited in declared order
            for dep in spec.deps.iter().rev() {
                stack.push(dep.clone());
            }
            specs.push(spec);
        }

        Self::from_specs(specs)
    }

    /// Build a graph from already-constructed specs.
    ///
    /// Every dependency must refer to a spec in the list, duplicates by
    /// identity are interned to the first occurrence, and a dependency
    /// cycle fails with `CyclicDependencyError` naming the cycle.
    pub fn from_specs(all: Vec<TaskSpec>) -> Result<Self> {
        let mut specs: HashMap<TaskId, TaskSpec> = HashMap::new();
        let mut indices: HashMap<TaskId, NodeIndex> = HashMap::new();
        let mut graph: DiGraph<TaskId, ()> = DiGraph::new();

        for spec in all {
            if specs.contains_key(&spec.id) {
                continue;
            }
            let idx = graph.add_node(spec.id.clone());
            indices.insert(spec.id.clone(), idx);
            specs.insert(spec.id.clone(), spec);
        }

        // Edge direction: dependency -> dependent.
        for spec in specs.values() {
            let to = indices[&spec.id];
            for dep in &spec.deps {
                let from = *indices.get(dep).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "task '{}' depends on '{}' which is not in the graph",
                        spec.id, dep
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        let order = stable_toposort(&graph)?;
        debug!(tasks = order.len(), "task graph resolved");

        Ok(Self {
            specs,
            indices,
            graph,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Execution order: dependencies strictly before dependents.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn spec(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.specs.get(id)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, dir: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].clone())
            .collect()
    }
}

/// Kahn's algorithm with a deterministic tie-break: among nodes whose
/// dependencies are all emitted, the one first added to the graph comes
/// first. Leftover nodes mean a cycle, which is extracted and named.
fn stable_toposort(graph: &DiGraph<TaskId, ()>) -> Result<Vec<TaskId>> {
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = graph
        .node_indices()
        .filter(|n| indegree[n.index()] == 0)
        .map(|n| Reverse(n.index()))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(i)) = ready.pop() {
        let node = NodeIndex::new(i);
        order.push(graph[node].clone());
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            indegree[succ.index()] -= 1;
            if indegree[succ.index()] == 0 {
                ready.push(Reverse(succ.index()));
            }
        }
    }

    if order.len() < graph.node_count() {
        let cycle = find_cycle(graph, &indegree);
        return Err(PipelineError::CyclicDependency(cycle));
    }

    Ok(order)
}

/// Walk incoming edges among the nodes Kahn could not emit until an id
/// repeats, then format the enclosed cycle as `a -> b -> a`.
fn find_cycle(graph: &DiGraph<TaskId, ()>, indegree: &[usize]) -> String {
    let Some(start) = graph.node_indices().find(|n| indegree[n.index()] > 0) else {
        return "unknown cycle".to_string();
    };

    let mut path: Vec<NodeIndex> = vec![start];
    let mut current = start;
    loop {
        let Some(pred) = graph
            .neighbors_directed(current, Direction::Incoming)
            .find(|p| indegree[p.index()] > 0)
        else {
            break;
        };
        if let Some(pos) = path.iter().position(|&n| n == pred) {
            let mut names: Vec<String> = path[pos..]
                .iter()
                .rev()
                .map(|&n| graph[n].to_string())
                .collect();
            if let Some(first) = names.first().cloned() {
                names.push(first);
            }
            return names.join(" -> ");
        }
        path.push(pred);
        current = pred;
    }

    "unknown cycle".to_string()
}
