//! Worker model shared by the orchestrator and the load balancer.

use crate::core::task::{GraphNode, Priority, DEFAULT_DURATION_MINUTES, META_AGENT_TYPE};
use crate::orchestration::keywords::extract_keywords;
use crate::orchestration::parser::ParsedTask;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    /// Workload above the rebalance threshold.
    Overloaded,
    Offline,
    Error,
}

impl AgentStatus {
    /// Offline and errored workers never receive work.
    pub fn is_available(&self) -> bool {
        !matches!(self, AgentStatus::Offline | AgentStatus::Error)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Overloaded => "overloaded",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A worker that can take tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Fraction of capacity in use, in `[0, 1]`.
    pub workload: f64,
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub current_tasks: Vec<String>,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub failed_tasks: u32,
    /// Running mean of observed task durations, in minutes.
    #[serde(default)]
    pub average_task_duration: f64,
    /// Smoothed success rate, in `[0, 1]`.
    pub reliability: f64,
    pub status: AgentStatus,
    #[serde(default)]
    pub specializations: BTreeSet<String>,
    pub last_active: DateTime<Utc>,
}

impl AgentInfo {
    /// An idle worker with no history. New workers start fully reliable.
    pub fn new(id: &str, agent_type: &str, max_concurrent_tasks: usize) -> Self {
        Self {
            id: id.to_string(),
            agent_type: agent_type.to_lowercase(),
            capabilities: BTreeSet::new(),
            workload: 0.0,
            max_concurrent_tasks,
            current_tasks: Vec::new(),
            completed_tasks: 0,
            failed_tasks: 0,
            average_task_duration: 0.0,
            reliability: 1.0,
            status: AgentStatus::Idle,
            specializations: BTreeSet::new(),
            last_active: Utc::now(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_lowercase()).collect();
        self
    }

    pub fn with_specializations(mut self, specializations: &[&str]) -> Self {
        self.specializations = specializations.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_workload(mut self, workload: f64) -> Self {
        self.workload = workload.clamp(0.0, 1.0);
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn free_slots(&self) -> usize {
        self.max_concurrent_tasks
            .saturating_sub(self.current_tasks.len())
    }

    pub fn has_capacity(&self) -> bool {
        self.free_slots() > 0
    }

    /// Check a capability against both capabilities and specializations.
    pub fn has_capability(&self, capability: &str) -> bool {
        let capability = capability.to_lowercase();
        self.capabilities.contains(&capability) || self.specializations.contains(&capability)
    }

    /// Recompute workload and status from the current task list.
    ///
    /// Offline and errored workers keep their status.
    pub fn refresh_load(&mut self, overload_threshold: f64) {
        self.workload = if self.max_concurrent_tasks == 0 {
            1.0
        } else {
            (self.current_tasks.len() as f64 / self.max_concurrent_tasks as f64).min(1.0)
        };

        if !self.status.is_available() {
            return;
        }
        self.status = if self.current_tasks.is_empty() {
            AgentStatus::Idle
        } else if self.workload > overload_threshold {
            AgentStatus::Overloaded
        } else {
            AgentStatus::Busy
        };
    }
}

/// Partial update applied by [`crate::orchestration::AgentAssignment::update_agent`].
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub status: Option<AgentStatus>,
    pub capabilities: Option<BTreeSet<String>>,
    pub specializations: Option<BTreeSet<String>>,
    pub max_concurrent_tasks: Option<usize>,
}

/// What the load balancer needs to know about a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub name: String,
    pub priority: Priority,
    pub estimated_duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Capabilities that raise an agent's score. Hard requirements go in
    /// [`crate::orchestration::AssignmentConstraints`].
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Affinity keys: significant words of the name plus tags.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl TaskDescriptor {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            priority: Priority::default(),
            estimated_duration: DEFAULT_DURATION_MINUTES,
            agent_type: None,
            capabilities: BTreeSet::new(),
            tags: BTreeSet::new(),
            keywords: extract_keywords(name),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = minutes;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_lowercase()).collect();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_lowercase()).collect();
        self.keywords = keywords_with_tags(&self.name, &self.tags);
        self
    }

    pub fn with_agent_type(mut self, agent_type: &str) -> Self {
        self.agent_type = Some(agent_type.to_lowercase());
        self
    }
}

fn keywords_with_tags(name: &str, tags: &BTreeSet<String>) -> Vec<String> {
    let mut keywords = extract_keywords(name);
    for tag in tags {
        let tag = tag.to_lowercase();
        if !keywords.contains(&tag) {
            keywords.push(tag);
        }
    }
    keywords
}

impl From<&ParsedTask> for TaskDescriptor {
    /// Tags double as desired capabilities.
    fn from(task: &ParsedTask) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            priority: task.priority,
            estimated_duration: task.estimated_duration,
            agent_type: task.agent_type.clone(),
            capabilities: task.tags.iter().map(|t| t.to_lowercase()).collect(),
            tags: task.tags.clone(),
            keywords: keywords_with_tags(&task.name, &task.tags),
        }
    }
}

impl From<&GraphNode> for TaskDescriptor {
    fn from(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            priority: node.priority,
            estimated_duration: node.estimated_duration,
            agent_type: node
                .metadata
                .get(META_AGENT_TYPE)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            capabilities: node.tags.iter().map(|t| t.to_lowercase()).collect(),
            tags: node.tags.clone(),
            keywords: keywords_with_tags(&node.name, &node.tags),
        }
    }
}

/// A decision to run a task on an agent. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub agent_id: String,
    pub score: f64,
    /// Human-readable score breakdown.
    pub reason: String,
    pub estimated_start: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
}

impl TaskAssignment {
    /// Assignment starting now and finishing after `duration_minutes`.
    pub fn starting_now(
        task_id: &str,
        agent_id: &str,
        score: f64,
        reason: String,
        duration_minutes: u32,
    ) -> Self {
        let start = Utc::now();
        Self {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            score,
            reason,
            estimated_start: start,
            estimated_completion: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }
}
