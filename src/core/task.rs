//! Task data model for the dependency graph.
//!
//! A [`GraphNode`] is one vertex of the DAG: identity, priority, estimated
//! duration and a few scheduling hints. Lifecycle state lives with the
//! orchestrator, not here, so the graph stays a pure structure.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Duration assumed for a task that does not state one, in minutes.
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Metadata key holding the heading path a parsed task appeared under.
pub const META_SECTION: &str = "section";
/// Metadata key holding the worker-type hint of a parsed task.
pub const META_AGENT_TYPE: &str = "agent_type";
/// Metadata key holding the 1-based source line of a parsed task.
pub const META_LINE: &str = "line";

/// Task priority. `P1` is the most urgent.
///
/// The derived ordering sorts `P1` first, so ascending sorts and min-heaps
/// yield the most urgent work first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// Parse `1`/`2`/`3` or `P1`/`P2`/`P3`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches(&['P', 'p'][..]) {
            "1" => Some(Priority::P1),
            "2" => Some(Priority::P2),
            "3" => Some(Priority::P3),
            _ => None,
        }
    }

    /// Lower-case class name used in diagram output.
    pub fn class_name(&self) -> &'static str {
        match self {
            Priority::P1 => "p1",
            Priority::P2 => "p2",
            Priority::P3 => "p3",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::P1 => write!(f, "P1"),
            Priority::P2 => write!(f, "P2"),
            Priority::P3 => write!(f, "P3"),
        }
    }
}

/// Kind of dependency between two tasks.
///
/// Only [`DependencyType::Blocks`] gates readiness. The other kinds are
/// informational but still constrain ordering, batching and the critical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    /// `from` must complete before `to` may start.
    #[default]
    Blocks,
    /// `to` benefits from `from` finishing first.
    SoftDepends,
    /// `to` consumes output produced by `from`.
    DataFlow,
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Blocks => write!(f, "blocks"),
            DependencyType::SoftDepends => write!(f, "soft-depends"),
            DependencyType::DataFlow => write!(f, "data-flow"),
        }
    }
}

/// A directed edge: `from` must finish before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: DependencyType,
}

/// A single task vertex in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique, stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    /// Estimated duration in minutes.
    pub estimated_duration: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Eligible to run alongside unrelated ready work.
    #[serde(default)]
    pub parallelizable: bool,
    /// Open metadata. See the `META_*` constants for the keys this crate writes.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GraphNode {
    /// Build a node from an id, a name and resolved options.
    pub fn new(id: &str, name: &str, opts: TaskOptions) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: opts.description,
            priority: opts.priority.unwrap_or_default(),
            estimated_duration: opts.estimated_duration.unwrap_or(DEFAULT_DURATION_MINUTES),
            tags: opts.tags,
            parallelizable: opts.parallelizable.unwrap_or(false),
            metadata: opts.metadata,
        }
    }

    /// Check whether the node carries a tag (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Optional attributes for [`crate::core::DependencyGraph::add_task`].
///
/// Unset fields fall back to P2, [`DEFAULT_DURATION_MINUTES`] and
/// `parallelizable = false`.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub estimated_duration: Option<u32>,
    pub tags: BTreeSet<String>,
    pub parallelizable: Option<bool>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = Some(minutes);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn parallelizable(mut self, parallelizable: bool) -> Self {
        self.parallelizable = Some(parallelizable);
        self
    }

    pub fn meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Task status in its lifecycle.
///
/// `Blocked` is recomputed from the graph after every transition rather than
/// entered explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Known but not yet classified.
    #[default]
    Pending,
    /// All blocking dependencies complete.
    Ready,
    /// Picked by a scorer, not yet started.
    Assigned,
    /// Explicitly started by its worker.
    InProgress,
    Completed,
    Failed,
    /// Waiting on at least one incomplete dependency.
    Blocked,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change again without a requeue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Assigned and in-progress tasks occupy a worker.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}
