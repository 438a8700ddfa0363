//! Derived analyses over a [`DependencyGraph`]: critical path, bottlenecks,
//! summary statistics and Mermaid diagram export.

use crate::core::dag::DependencyGraph;
use crate::core::task::{DependencyType, Priority};
use crate::error::Result;
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// Bottleneck threshold on the critical path, as a multiple of the mean task duration.
const CRITICAL_BOTTLENECK_FACTOR: f64 = 1.5;

/// The longest duration-weighted chain through the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Task ids from first to last.
    pub path: Vec<String>,
    /// Sum of the durations along `path`, in minutes.
    pub total_duration: u64,
    /// Path members whose duration exceeds 1.5x the graph mean.
    pub bottlenecks: Vec<String>,
}

/// A task whose delay would hold up many others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub task_id: String,
    /// Number of transitive dependents.
    pub dependent_count: usize,
    pub duration: u32,
    /// `dependent_count * duration`.
    pub impact: u64,
}

/// Summary numbers for a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub task_count: usize,
    pub dependency_count: usize,
    /// Tasks with no predecessors.
    pub root_count: usize,
    /// Tasks with no dependents.
    pub leaf_count: usize,
    pub parallelizable_count: usize,
    /// Number of parallel batches (dependency depth).
    pub batch_count: usize,
    /// Size of the largest parallel batch.
    pub max_parallelism: usize,
    pub total_duration: u64,
    pub average_duration: f64,
    pub critical_path_duration: u64,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_dependency_type: BTreeMap<String, usize>,
}

impl DependencyGraph {
    /// Compute the critical path.
    ///
    /// Forward pass over the topological order: `dist[v]` is the longest
    /// finishing time of any predecessor chain. The path ends at the node
    /// maximizing `dist + duration` and is rebuilt from predecessor links.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cycle`] if the graph contains a cycle.
    pub fn get_critical_path(&self) -> Result<CriticalPath> {
        let order = self.get_execution_order()?;
        if order.is_empty() {
            return Ok(CriticalPath::default());
        }

        let mut dist: HashMap<NodeIndex, u64> = HashMap::new();
        let mut pred: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut end: Option<(NodeIndex, u64)> = None;

        for id in &order {
            let index = self.node_index(id)?;
            let finish = dist.get(&index).copied().unwrap_or(0) + self.duration_of(index);

            for next in self.successors(index) {
                let current = dist.entry(next).or_insert(0);
                if finish > *current || !pred.contains_key(&next) {
                    *current = (*current).max(finish);
                    pred.insert(next, index);
                }
            }

            if end.map_or(true, |(_, best)| finish > best) {
                end = Some((index, finish));
            }
        }

        let Some((last, total_duration)) = end else {
            return Ok(CriticalPath::default());
        };

        let mut chain = vec![last];
        let mut cursor = last;
        while let Some(&prev) = pred.get(&cursor) {
            chain.push(prev);
            cursor = prev;
        }
        chain.reverse();

        let mean = self.mean_duration();
        let bottlenecks = chain
            .iter()
            .filter(|&&i| self.duration_of(i) as f64 > CRITICAL_BOTTLENECK_FACTOR * mean)
            .map(|&i| self.id_of(i))
            .collect();

        Ok(CriticalPath {
            path: chain.into_iter().map(|i| self.id_of(i)).collect(),
            total_duration,
            bottlenecks,
        })
    }

    /// Rank every task by how much downstream work it holds up.
    ///
    /// Sorted by impact descending; ties keep insertion order.
    pub fn get_bottlenecks(&self) -> Vec<Bottleneck> {
        let mut bottlenecks: Vec<Bottleneck> = self
            .indices_in_sequence()
            .into_iter()
            .map(|index| {
                let dependent_count = self.transitive_dependent_count(index);
                let duration = self.node_at(index).estimated_duration;
                Bottleneck {
                    task_id: self.id_of(index),
                    dependent_count,
                    duration,
                    impact: dependent_count as u64 * u64::from(duration),
                }
            })
            .collect();

        bottlenecks.sort_by(|a, b| b.impact.cmp(&a.impact));
        bottlenecks
    }

    fn transitive_dependent_count(&self, start: NodeIndex) -> usize {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);

        while let Some(index) = queue.pop_front() {
            for next in self.successors(index) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.len()
    }

    /// Collect summary statistics.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cycle`] if the graph contains a cycle.
    pub fn get_stats(&self) -> Result<GraphStats> {
        let batches = self.get_parallel_batches()?;
        let critical = self.get_critical_path()?;
        let indices = self.indices_in_sequence();

        let mut stats = GraphStats {
            task_count: self.task_count(),
            dependency_count: self.dependency_count(),
            batch_count: batches.len(),
            max_parallelism: batches.iter().map(|b| b.task_ids.len()).max().unwrap_or(0),
            critical_path_duration: critical.total_duration,
            average_duration: self.mean_duration(),
            ..GraphStats::default()
        };

        for &index in &indices {
            let node = self.node_at(index);
            stats.total_duration += u64::from(node.estimated_duration);
            *stats.by_priority.entry(node.priority).or_insert(0) += 1;
            if node.parallelizable {
                stats.parallelizable_count += 1;
            }
            if self.predecessors(index).is_empty() {
                stats.root_count += 1;
            }
            let successors = self.successors(index);
            if successors.is_empty() {
                stats.leaf_count += 1;
            }
            for next in successors {
                if let Some(kind) = self.edge_kind(index, next) {
                    *stats.by_dependency_type.entry(kind.to_string()).or_insert(0) += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Render the graph as a Mermaid `graph TD` diagram.
    pub fn to_mermaid(&self) -> String {
        let indices = self.indices_in_sequence();
        let ids = mermaid_ids(indices.iter().map(|&i| self.node_at(i).id.as_str()));
        let mut out = String::from("graph TD\n");

        for &index in &indices {
            let node = self.node_at(index);
            let id = &ids[node.id.as_str()];
            let label = mermaid_label(&node.name);
            if node.parallelizable {
                let _ = writeln!(out, "    {id}([\"{label}\"])");
            } else {
                let _ = writeln!(out, "    {id}[\"{label}\"]");
            }
        }

        for &index in &indices {
            for next in self.successors(index) {
                let arrow = match self.edge_kind(index, next) {
                    Some(DependencyType::SoftDepends) => "-.->",
                    Some(DependencyType::DataFlow) => "==>",
                    _ => "-->",
                };
                let _ = writeln!(
                    out,
                    "    {} {} {}",
                    ids[self.node_at(index).id.as_str()],
                    arrow,
                    ids[self.node_at(next).id.as_str()]
                );
            }
        }

        out.push_str("    classDef p1 fill:#fee2e2,stroke:#dc2626,stroke-width:2px\n");
        out.push_str("    classDef p2 fill:#fef9c3,stroke:#ca8a04\n");
        out.push_str("    classDef p3 fill:#dcfce7,stroke:#16a34a\n");

        for priority in [Priority::P1, Priority::P2, Priority::P3] {
            let members: Vec<String> = indices
                .iter()
                .map(|&i| self.node_at(i))
                .filter(|n| n.priority == priority)
                .map(|n| ids[n.id.as_str()].clone())
                .collect();
            if !members.is_empty() {
                let _ = writeln!(out, "    class {} {}", members.join(","), priority.class_name());
            }
        }

        out
    }

    fn duration_of(&self, index: NodeIndex) -> u64 {
        u64::from(self.node_at(index).estimated_duration)
    }

    fn mean_duration(&self) -> f64 {
        let count = self.task_count();
        if count == 0 {
            return 0.0;
        }
        let total: u64 = self
            .indices_in_sequence()
            .into_iter()
            .map(|i| self.duration_of(i))
            .sum();
        total as f64 / count as f64
    }
}

/// Mermaid node ids allow only word characters.
fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Assign each task a distinct Mermaid id, in the given order.
///
/// Ids that sanitize to the same word get a numeric suffix, so `a-1` and
/// `a_1` stay separate nodes.
fn mermaid_ids<'a>(task_ids: impl Iterator<Item = &'a str>) -> HashMap<&'a str, String> {
    let mut taken = HashSet::new();
    let mut ids = HashMap::new();
    for task_id in task_ids {
        let base = mermaid_id(task_id);
        let mut candidate = base.clone();
        let mut n = 2;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        ids.insert(task_id, candidate);
    }
    ids
}

fn mermaid_label(name: &str) -> String {
    name.replace('"', "#quot;")
}
