//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! [`DependencyGraph`] owns the task vertices and their dependency edges,
//! rejects edges that would close a cycle, and derives scheduling views from
//! the structure: a priority-aware topological order, level-based parallel
//! batches and the "what can start now" ready set. Critical-path and
//! bottleneck analysis live in [`crate::core::analysis`].

use crate::core::task::{DependencyType, GraphEdge, GraphNode, Priority, TaskOptions};
use crate::error::{Error, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::{wlog_debug, wlog_trace};
use crossbeam_channel::Receiver;
use petgraph::algo::toposort;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::OnceLock;

/// Structural change notifications emitted by a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    NodeAdded {
        id: String,
    },
    NodeRemoved {
        id: String,
    },
    EdgeAdded {
        from: String,
        to: String,
        kind: DependencyType,
    },
    EdgeRemoved {
        from: String,
        to: String,
    },
    /// Every node and edge was dropped at once.
    Cleared,
}

/// A group of tasks at the same dependency level.
///
/// Tasks in one batch have no dependency path between them and may run
/// concurrently. A batch cannot finish before its slowest member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelBatch {
    /// Longest hop count from any root to the members of this batch.
    pub level: usize,
    /// Member ids, most urgent first.
    pub task_ids: Vec<String>,
    /// Longest member duration in minutes.
    pub duration: u32,
}

/// A cycle found by [`DependencyGraph::detect_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Ids of the tasks on the cycle.
    pub nodes: BTreeSet<String>,
    /// DFS path from the traversal root to the node that closes the cycle.
    pub path: Vec<String>,
}

/// Lazily derived views, dropped wholesale by [`DependencyGraph::invalidate`].
#[derive(Debug, Default)]
struct GraphCache {
    order: OnceLock<Vec<String>>,
    batches: OnceLock<Vec<ParallelBatch>>,
}

/// The task dependency graph.
///
/// Nodes are [`GraphNode`]s and edges carry a [`DependencyType`]. An edge
/// `from -> to` means `from` must finish before `to`. A stable graph keeps
/// node indices valid across removals; an insertion sequence number per node
/// breaks priority ties deterministically.
pub struct DependencyGraph {
    graph: StableDiGraph<GraphNode, DependencyType>,
    index: HashMap<String, NodeIndex>,
    sequence: HashMap<NodeIndex, u64>,
    next_sequence: u64,
    cache: GraphCache,
    events: EventBus<GraphEvent>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            sequence: HashMap::new(),
            next_sequence: 0,
            cache: GraphCache::default(),
            events: EventBus::new(),
        }
    }

    /// Subscribe to structural change events.
    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<GraphEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Drop every cached view. Every mutator goes through here.
    fn invalidate(&mut self) {
        self.cache = GraphCache::default();
    }

    // ========== Mutation ==========

    /// Add a task built from an id, a name and options.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateTask`] if the id is already present.
    pub fn add_task(&mut self, id: &str, name: &str, opts: TaskOptions) -> Result<()> {
        self.add_node(GraphNode::new(id, name, opts))
    }

    /// Add a fully built node.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateTask`] if the node's id is already present.
    pub fn add_node(&mut self, node: GraphNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(Error::DuplicateTask(node.id));
        }

        let id = node.id.clone();
        let index = self.graph.add_node(node);
        self.index.insert(id.clone(), index);
        self.sequence.insert(index, self.next_sequence);
        self.next_sequence += 1;
        self.invalidate();

        wlog_debug!("graph: added task {}", id);
        self.events.publish(GraphEvent::NodeAdded { id });
        Ok(())
    }

    /// Remove a task and every edge touching it.
    ///
    /// Returns `false` if the task does not exist.
    pub fn remove_task(&mut self, id: &str) -> bool {
        let Some(index) = self.index.remove(id) else {
            return false;
        };

        let incident: Vec<(EdgeIndex, NodeIndex, NodeIndex)> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .chain(self.graph.edges_directed(index, Direction::Outgoing))
            .map(|e| (e.id(), e.source(), e.target()))
            .collect();

        let mut removed_edges = Vec::with_capacity(incident.len());
        for (edge, source, target) in incident {
            removed_edges.push((self.id_of(source), self.id_of(target)));
            self.graph.remove_edge(edge);
        }

        self.graph.remove_node(index);
        self.sequence.remove(&index);
        self.invalidate();

        wlog_debug!(
            "graph: removed task {} ({} edges detached)",
            id,
            removed_edges.len()
        );
        for (from, to) in removed_edges {
            self.events.publish(GraphEvent::EdgeRemoved { from, to });
        }
        self.events.publish(GraphEvent::NodeRemoved { id: id.to_string() });
        true
    }

    /// Add a dependency: `from` must finish before `to` can start.
    ///
    /// Adding an edge that already exists is a no-op. The edge is inserted
    /// speculatively and rolled back if a path leads from `to` back to `from`.
    ///
    /// # Errors
    /// - [`Error::UnknownTask`] if either endpoint is missing
    /// - [`Error::SelfDependency`] if `from == to`
    /// - [`Error::CycleDetected`] carrying the would-be cycle `from -> to -> ... -> from`;
    ///   the graph is left unchanged
    pub fn add_dependency(&mut self, from: &str, to: &str, kind: DependencyType) -> Result<()> {
        let from_index = self.node_index(from)?;
        let to_index = self.node_index(to)?;

        if from_index == to_index {
            return Err(Error::SelfDependency(from.to_string()));
        }

        if self.graph.find_edge(from_index, to_index).is_some() {
            return Ok(());
        }

        let edge = self.graph.add_edge(from_index, to_index, kind);

        if let Some(back_path) = self.find_path(to_index, from_index) {
            self.graph.remove_edge(edge);
            let mut path = vec![from.to_string()];
            path.extend(back_path.into_iter().map(|i| self.id_of(i)));
            wlog_debug!("graph: rejected {} -> {}: cycle {}", from, to, path.join(" -> "));
            return Err(Error::CycleDetected { path });
        }

        self.invalidate();
        wlog_debug!("graph: added dependency {} -> {} ({})", from, to, kind);
        self.events.publish(GraphEvent::EdgeAdded {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        });
        Ok(())
    }

    /// Remove the edge `from -> to`. Returns `false` if it does not exist.
    pub fn remove_dependency(&mut self, from: &str, to: &str) -> bool {
        let (Some(&from_index), Some(&to_index)) = (self.index.get(from), self.index.get(to))
        else {
            return false;
        };
        let Some(edge) = self.graph.find_edge(from_index, to_index) else {
            return false;
        };

        self.graph.remove_edge(edge);
        self.invalidate();
        self.events.publish(GraphEvent::EdgeRemoved {
            from: from.to_string(),
            to: to.to_string(),
        });
        true
    }

    /// Mutate a node in place. The id cannot be changed this way.
    pub fn update_task<F>(&mut self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut GraphNode),
    {
        let index = self.node_index(id)?;
        if let Some(node) = self.graph.node_weight_mut(index) {
            f(node);
            node.id = id.to_string();
        }
        self.invalidate();
        Ok(())
    }

    /// Remove every node and edge.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
        self.sequence.clear();
        self.next_sequence = 0;
        self.invalidate();
        self.events.publish(GraphEvent::Cleared);
    }

    // ========== Queries ==========

    pub fn get_task(&self, id: &str) -> Option<&GraphNode> {
        self.index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> Vec<&GraphNode> {
        self.indices_in_sequence()
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    /// All edges, grouped by source in insertion order.
    pub fn edges(&self) -> Vec<GraphEdge> {
        let mut edges = Vec::with_capacity(self.graph.edge_count());
        for index in self.indices_in_sequence() {
            for next in self.successors(index) {
                if let Some(edge) = self.graph.find_edge(index, next) {
                    edges.push(GraphEdge {
                        from: self.id_of(index),
                        to: self.id_of(next),
                        kind: self.graph[edge],
                    });
                }
            }
        }
        edges
    }

    pub fn has_dependency(&self, from: &str, to: &str) -> bool {
        self.dependency_kind(from, to).is_some()
    }

    pub fn dependency_kind(&self, from: &str, to: &str) -> Option<DependencyType> {
        let from_index = self.index.get(from)?;
        let to_index = self.index.get(to)?;
        let edge = self.graph.find_edge(*from_index, *to_index)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Ids of the tasks `id` depends on (its predecessors).
    pub fn get_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let index = self.node_index(id)?;
        Ok(self
            .predecessors(index)
            .into_iter()
            .map(|i| self.id_of(i))
            .collect())
    }

    /// Ids of the tasks that depend on `id` (its successors).
    pub fn get_dependents(&self, id: &str) -> Result<Vec<String>> {
        let index = self.node_index(id)?;
        Ok(self
            .successors(index)
            .into_iter()
            .map(|i| self.id_of(i))
            .collect())
    }

    /// Tasks flagged as safe to run alongside unrelated work.
    pub fn get_parallelizable_tasks(&self) -> Vec<&GraphNode> {
        self.tasks().into_iter().filter(|n| n.parallelizable).collect()
    }

    /// Tasks that can start now.
    ///
    /// A task is ready if it is not in `completed` and the source of every
    /// incoming `blocks` edge is. Soft and data-flow edges do not gate
    /// readiness. The result is sorted by priority, then insertion order.
    pub fn get_ready_tasks(&self, completed: &HashSet<String>) -> Vec<&GraphNode> {
        let mut ready: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&index| {
                let node = &self.graph[index];
                if completed.contains(&node.id) {
                    return false;
                }
                self.graph
                    .edges_directed(index, Direction::Incoming)
                    .filter(|e| *e.weight() == DependencyType::Blocks)
                    .all(|e| completed.contains(&self.graph[e.source()].id))
            })
            .collect();

        ready.sort_by_key(|&i| self.rank(i));
        ready.into_iter().map(|i| &self.graph[i]).collect()
    }

    /// Check whether every task is in `completed`.
    pub fn all_complete(&self, completed: &HashSet<String>) -> bool {
        self.index.keys().all(|id| completed.contains(id))
    }

    // ========== Validation ==========

    /// Search the whole graph for a cycle.
    ///
    /// `add_dependency` never lets one in, so this returns `None` for any
    /// graph built through the public API.
    pub fn detect_cycle(&self) -> Option<Cycle> {
        if toposort(&self.graph, None).is_ok() {
            return None;
        }

        let mut visited = HashSet::new();
        for root in self.indices_in_sequence() {
            if !visited.insert(root) {
                continue;
            }
            // One frame per node on the current path; the path is the frame stack.
            let mut on_stack = HashSet::from([root]);
            let mut stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> =
                vec![(root, self.successors(root).into_iter())];

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.next() {
                    Some(next) if on_stack.contains(&next) => {
                        let path: Vec<NodeIndex> = stack.iter().map(|(i, _)| *i).collect();
                        let start = path.iter().position(|&i| i == next).unwrap_or(0);
                        let nodes = path[start..].iter().map(|&i| self.id_of(i)).collect();
                        let mut full: Vec<String> = path.iter().map(|&i| self.id_of(i)).collect();
                        full.push(self.id_of(next));
                        return Some(Cycle { nodes, path: full });
                    }
                    Some(next) => {
                        if visited.insert(next) {
                            on_stack.insert(next);
                            stack.push((next, self.successors(next).into_iter()));
                        }
                    }
                    None => {
                        on_stack.remove(&node);
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Depth-first search for a path `start -> ... -> target`.
    ///
    /// Walks with an explicit frame stack so chain length is bounded by the
    /// heap, not the thread stack.
    fn find_path(&self, start: NodeIndex, target: NodeIndex) -> Option<Vec<NodeIndex>> {
        if start == target {
            return Some(vec![start]);
        }
        let mut visited = HashSet::from([start]);
        let mut stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> =
            vec![(start, self.successors(start).into_iter())];

        while let Some((_, pending)) = stack.last_mut() {
            match pending.next() {
                Some(next) if next == target => {
                    let mut path: Vec<NodeIndex> = stack.iter().map(|(i, _)| *i).collect();
                    path.push(target);
                    return Some(path);
                }
                Some(next) => {
                    if visited.insert(next) {
                        stack.push((next, self.successors(next).into_iter()));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
        None
    }

    // ========== Scheduling Views ==========

    /// Tasks in dependency order, most urgent first among the unblocked.
    ///
    /// Kahn's algorithm over a min-heap keyed by (priority, insertion order).
    /// Cached until the next mutation.
    ///
    /// # Errors
    /// Returns [`Error::Cycle`] if the graph contains a cycle.
    pub fn get_execution_order(&self) -> Result<Vec<String>> {
        if let Some(order) = self.cache.order.get() {
            return Ok(order.clone());
        }

        let order: Vec<String> = self
            .kahn_order()?
            .into_iter()
            .map(|i| self.id_of(i))
            .collect();
        wlog_trace!("graph: rebuilt execution order ({} tasks)", order.len());
        let _ = self.cache.order.set(order.clone());
        Ok(order)
    }

    fn kahn_order(&self) -> Result<Vec<NodeIndex>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| (i, self.graph.edges_directed(i, Direction::Incoming).count()))
            .collect();

        let mut frontier: BinaryHeap<Reverse<(Priority, u64, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&i, _)| Reverse(self.rank(i)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, _, index))) = frontier.pop() {
            order.push(index);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.push(Reverse(self.rank(next)));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(Error::Cycle {
                ordered: order.len(),
                total: self.graph.node_count(),
            });
        }
        Ok(order)
    }

    /// Tasks grouped into dependency levels.
    ///
    /// A task's level is the longest hop count from any root, so every edge
    /// goes from a lower level to a strictly higher one. Cached until the
    /// next mutation.
    ///
    /// # Errors
    /// Returns [`Error::Cycle`] if the graph contains a cycle.
    pub fn get_parallel_batches(&self) -> Result<Vec<ParallelBatch>> {
        if let Some(batches) = self.cache.batches.get() {
            return Ok(batches.clone());
        }

        let order = self.get_execution_order()?;
        let mut levels: HashMap<NodeIndex, usize> = HashMap::new();
        let mut groups: Vec<Vec<NodeIndex>> = Vec::new();

        for id in &order {
            let index = self.node_index(id)?;
            let level = *levels.entry(index).or_insert(0);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                let candidate = levels.entry(next).or_insert(0);
                *candidate = (*candidate).max(level + 1);
            }
            if groups.len() <= level {
                groups.resize_with(level + 1, Vec::new);
            }
            groups[level].push(index);
        }

        let batches: Vec<ParallelBatch> = groups
            .into_iter()
            .enumerate()
            .map(|(level, mut members)| {
                members.sort_by_key(|&i| self.rank(i));
                ParallelBatch {
                    level,
                    duration: members
                        .iter()
                        .map(|&i| self.graph[i].estimated_duration)
                        .max()
                        .unwrap_or(0),
                    task_ids: members.into_iter().map(|i| self.id_of(i)).collect(),
                }
            })
            .collect();

        wlog_trace!("graph: rebuilt parallel batches ({} levels)", batches.len());
        let _ = self.cache.batches.set(batches.clone());
        Ok(batches)
    }

    // ========== Internal Helpers ==========

    pub(crate) fn node_index(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownTask(id.to_string()))
    }

    pub(crate) fn node_at(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub(crate) fn id_of(&self, index: NodeIndex) -> String {
        self.graph[index].id.clone()
    }

    /// Sort key for deterministic priority ordering.
    pub(crate) fn rank(&self, index: NodeIndex) -> (Priority, u64, NodeIndex) {
        (
            self.graph[index].priority,
            self.sequence.get(&index).copied().unwrap_or(u64::MAX),
            index,
        )
    }

    pub(crate) fn indices_in_sequence(&self) -> Vec<NodeIndex> {
        let mut indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        indices.sort_by_key(|i| self.sequence.get(i).copied().unwrap_or(u64::MAX));
        indices
    }

    pub(crate) fn successors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors_in_sequence(index, Direction::Outgoing)
    }

    pub(crate) fn predecessors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors_in_sequence(index, Direction::Incoming)
    }

    fn neighbors_in_sequence(&self, index: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(index, dir).collect();
        neighbors.sort_by_key(|i| self.sequence.get(i).copied().unwrap_or(u64::MAX));
        neighbors
    }

    pub(crate) fn edge_kind(&self, from: NodeIndex, to: NodeIndex) -> Option<DependencyType> {
        self.graph
            .find_edge(from, to)
            .and_then(|e| self.graph.edge_weight(e).copied())
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep structural copy. The clone starts with no subscribers.
impl Clone for DependencyGraph {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            index: self.index.clone(),
            sequence: self.sequence.clone(),
            next_sequence: self.next_sequence,
            cache: GraphCache::default(),
            events: EventBus::new(),
        }
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
