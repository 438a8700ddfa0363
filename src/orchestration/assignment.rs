//! Capability- and load-aware agent assignment.
//!
//! [`AgentAssignment`] keeps a registry of workers, scores each eligible
//! worker for a task and records the winner:
//!
//! ```text
//! score = w_cap * capability_fraction
//!       + w_load * (1 - workload)
//!       + w_rel * reliability
//!       + w_aff * affinity
//! ```
//!
//! Completions feed back into reliability (an exponential moving average)
//! and into a per-worker-type keyword affinity table.

use crate::config::AssignmentConfig;
use crate::core::task::Priority;
use crate::error::{Error, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::orchestration::agent::{
    AgentInfo, AgentStatus, AgentUpdate, TaskAssignment, TaskDescriptor,
};
use crate::{wlog, wlog_debug};
use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Affinity added per keyword when a task succeeds.
const AFFINITY_SUCCESS_DELTA: f64 = 1.0;
/// Affinity removed per keyword when a task fails.
const AFFINITY_FAILURE_DELTA: f64 = 0.5;
const SCORE_EPSILON: f64 = 1e-9;

/// Hard filters applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConstraints {
    /// Every one of these must be held by the agent.
    pub required_capabilities: BTreeSet<String>,
    pub excluded_agents: BTreeSet<String>,
    /// If non-empty, only these agent types qualify.
    pub preferred_types: Vec<String>,
    /// Overrides the configured workload ceiling.
    pub max_workload: Option<f64>,
}

impl AssignmentConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, capability: &str) -> Self {
        self.required_capabilities.insert(capability.to_lowercase());
        self
    }

    pub fn exclude(mut self, agent_id: &str) -> Self {
        self.excluded_agents.insert(agent_id.to_string());
        self
    }

    pub fn prefer_type(mut self, agent_type: &str) -> Self {
        self.preferred_types.push(agent_type.to_lowercase());
        self
    }

    pub fn max_workload(mut self, ceiling: f64) -> Self {
        self.max_workload = Some(ceiling);
        self
    }
}

/// Per-factor contributions for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub capability: f64,
    pub workload: f64,
    pub reliability: f64,
    pub affinity: f64,
    pub total: f64,
}

impl std::fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "score {:.3} = capability {:.3} + load {:.3} + reliability {:.3} + affinity {:.3}",
            self.total, self.capability, self.workload, self.reliability, self.affinity
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMove {
    pub task_id: String,
    pub from_agent: String,
    pub to_agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub moves: Vec<TaskMove>,
    pub recommendations: Vec<String>,
    pub variance_before: f64,
    pub variance_after: f64,
}

/// Registry-wide load summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadStats {
    pub total_agents: usize,
    pub available_agents: usize,
    pub idle: usize,
    pub busy: usize,
    pub overloaded: usize,
    pub offline: usize,
    pub errored: usize,
    /// Sum of `max_concurrent_tasks` over available agents.
    pub total_capacity: usize,
    /// Tasks held by available agents.
    pub used_capacity: usize,
    pub active_assignments: usize,
    pub mean_workload: f64,
    pub workload_variance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentEvent {
    AgentRegistered {
        agent_id: String,
    },
    AgentUnregistered {
        agent_id: String,
        orphaned: Vec<String>,
    },
    AgentUpdated {
        agent_id: String,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
        score: f64,
    },
    TaskReleased {
        task_id: String,
        agent_id: String,
    },
    TaskMoved {
        task_id: String,
        from: String,
        to: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: String,
        success: bool,
    },
}

/// Worker registry and load balancer.
pub struct AgentAssignment {
    agents: BTreeMap<String, AgentInfo>,
    assignments: BTreeMap<String, TaskAssignment>,
    /// Descriptors of assigned tasks, kept for rebalancing and feedback.
    descriptors: HashMap<String, TaskDescriptor>,
    /// agent type -> keyword -> weight
    affinity: HashMap<String, HashMap<String, f64>>,
    config: AssignmentConfig,
    events: EventBus<AssignmentEvent>,
}

impl AgentAssignment {
    pub fn new(config: AssignmentConfig) -> Self {
        Self {
            agents: BTreeMap::new(),
            assignments: BTreeMap::new(),
            descriptors: HashMap::new(),
            affinity: HashMap::new(),
            config,
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<AssignmentEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ========== Registry ==========

    /// Add a worker. Its workload is derived from its current task list.
    pub fn register_agent(&mut self, mut agent: AgentInfo) -> Result<()> {
        if self.agents.contains_key(&agent.id) {
            return Err(Error::DuplicateAgent(agent.id));
        }
        agent.refresh_load(self.config.rebalance_threshold);
        let id = agent.id.clone();
        wlog_debug!(
            "assignment: registered {} ({}, capacity {})",
            id,
            agent.agent_type,
            agent.max_concurrent_tasks
        );
        self.agents.insert(id.clone(), agent);
        self.events
            .publish(AssignmentEvent::AgentRegistered { agent_id: id });
        Ok(())
    }

    /// Remove a worker and return the tasks it held. They are not reassigned.
    pub fn unregister_agent(&mut self, id: &str) -> Result<Vec<String>> {
        let agent = self
            .agents
            .remove(id)
            .ok_or_else(|| Error::AgentNotFound { id: id.to_string() })?;

        let orphaned = agent.current_tasks;
        for task_id in &orphaned {
            self.assignments.remove(task_id);
            self.descriptors.remove(task_id);
        }
        wlog!(
            "assignment: unregistered {} with {} orphaned task(s)",
            id,
            orphaned.len()
        );
        self.events.publish(AssignmentEvent::AgentUnregistered {
            agent_id: id.to_string(),
            orphaned: orphaned.clone(),
        });
        Ok(orphaned)
    }

    pub fn update_agent(&mut self, id: &str, update: AgentUpdate) -> Result<()> {
        let threshold = self.config.rebalance_threshold;
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound { id: id.to_string() })?;

        if let Some(status) = update.status {
            agent.status = status;
        }
        if let Some(capabilities) = update.capabilities {
            agent.capabilities = capabilities;
        }
        if let Some(specializations) = update.specializations {
            agent.specializations = specializations;
        }
        if let Some(max) = update.max_concurrent_tasks {
            agent.max_concurrent_tasks = max;
        }
        agent.refresh_load(threshold);
        agent.last_active = Utc::now();

        self.events.publish(AssignmentEvent::AgentUpdated {
            agent_id: id.to_string(),
        });
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Option<&AgentInfo> {
        self.agents.get(id)
    }

    /// All agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.values()
    }

    pub fn assignment_for(&self, task_id: &str) -> Option<&TaskAssignment> {
        self.assignments.get(task_id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &TaskAssignment> {
        self.assignments.values()
    }

    /// Learned affinity of a worker type for a keyword.
    pub fn affinity(&self, agent_type: &str, keyword: &str) -> f64 {
        self.affinity
            .get(agent_type)
            .and_then(|table| table.get(keyword))
            .copied()
            .unwrap_or(0.0)
    }

    // ========== Scoring ==========

    /// Score one agent for a task, ignoring hard filters.
    pub fn score(&self, agent: &AgentInfo, task: &TaskDescriptor) -> ScoreBreakdown {
        let w = &self.config.weights;

        let capability_fraction = if task.capabilities.is_empty() {
            1.0
        } else {
            let held = task
                .capabilities
                .iter()
                .filter(|c| agent.has_capability(c))
                .count();
            held as f64 / task.capabilities.len() as f64
        };

        let affinity = if task.keywords.is_empty() {
            0.0
        } else {
            task.keywords
                .iter()
                .map(|kw| {
                    let weight = self.affinity(&agent.agent_type, kw);
                    weight / (weight + 1.0)
                })
                .sum::<f64>()
                / task.keywords.len() as f64
        };

        let capability = w.capability * capability_fraction;
        let workload = w.workload * (1.0 - agent.workload);
        let reliability = w.reliability * agent.reliability;
        let affinity = w.affinity * affinity;

        ScoreBreakdown {
            capability,
            workload,
            reliability,
            affinity,
            total: capability + workload + reliability + affinity,
        }
    }

    fn is_eligible(&self, agent: &AgentInfo, constraints: &AssignmentConstraints) -> bool {
        let ceiling = constraints.max_workload.unwrap_or(self.config.max_workload);

        agent.status.is_available()
            && agent.has_capacity()
            && agent.workload <= ceiling
            && !constraints.excluded_agents.contains(&agent.id)
            && (constraints.preferred_types.is_empty()
                || constraints
                    .preferred_types
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&agent.agent_type)))
            && constraints
                .required_capabilities
                .iter()
                .all(|c| agent.has_capability(c))
    }

    // ========== Assignment ==========

    /// Pick the best eligible agent for a task and record the assignment.
    ///
    /// A task that is already assigned is released from its agent first.
    /// Returns `None` if no agent passes the hard filters.
    pub fn assign_task(
        &mut self,
        task: &TaskDescriptor,
        constraints: &AssignmentConstraints,
    ) -> Option<TaskAssignment> {
        self.release_task(&task.id);

        let mut best: Option<(&AgentInfo, ScoreBreakdown)> = None;
        for agent in self.agents.values() {
            if !self.is_eligible(agent, constraints) {
                continue;
            }
            let breakdown = self.score(agent, task);
            let better = match &best {
                None => true,
                Some((current, current_score)) => {
                    breakdown.total > current_score.total + SCORE_EPSILON
                        || ((breakdown.total - current_score.total).abs() <= SCORE_EPSILON
                            && agent.workload < current.workload)
                }
            };
            if better {
                best = Some((agent, breakdown));
            }
        }

        let Some((agent, breakdown)) = best else {
            wlog_debug!("assignment: no eligible agent for {}", task.id);
            return None;
        };
        let agent_id = agent.id.clone();

        let assignment = TaskAssignment::starting_now(
            &task.id,
            &agent_id,
            breakdown.total,
            breakdown.to_string(),
            task.estimated_duration,
        );
        self.attach(&task.id, &agent_id);
        self.descriptors.insert(task.id.clone(), task.clone());
        self.assignments
            .insert(task.id.clone(), assignment.clone());

        wlog_debug!("assignment: {} -> {} ({})", task.id, agent_id, breakdown);
        self.events.publish(AssignmentEvent::TaskAssigned {
            task_id: task.id.clone(),
            agent_id,
            score: breakdown.total,
        });
        Some(assignment)
    }

    /// Drop a task's assignment without recording an outcome.
    ///
    /// Returns the agent that held it.
    pub fn release_task(&mut self, task_id: &str) -> Option<String> {
        let previous = self.assignments.remove(task_id)?;
        self.detach(task_id, &previous.agent_id);
        self.descriptors.remove(task_id);
        self.events.publish(AssignmentEvent::TaskReleased {
            task_id: task_id.to_string(),
            agent_id: previous.agent_id.clone(),
        });
        Some(previous.agent_id)
    }

    fn attach(&mut self, task_id: &str, agent_id: &str) {
        let threshold = self.config.rebalance_threshold;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.current_tasks.push(task_id.to_string());
            agent.refresh_load(threshold);
            agent.last_active = Utc::now();
        }
    }

    fn detach(&mut self, task_id: &str, agent_id: &str) {
        let threshold = self.config.rebalance_threshold;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.current_tasks.retain(|t| t != task_id);
            agent.refresh_load(threshold);
        }
    }

    // ========== Feedback ==========

    pub fn complete_task(&mut self, task_id: &str, success: bool) -> Result<()> {
        self.complete_task_with_duration(task_id, success, None)
    }

    /// Record an outcome and free the agent's slot.
    ///
    /// `minutes` is the observed duration; when absent the task's estimate
    /// is used for the running average.
    pub fn complete_task_with_duration(
        &mut self,
        task_id: &str,
        success: bool,
        minutes: Option<f64>,
    ) -> Result<()> {
        let assignment = self
            .assignments
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::NotAssigned(task_id.to_string()))?;
        let agent_id = assignment.agent_id;
        if !self.agents.contains_key(&agent_id) {
            return Err(Error::AgentNotFound { id: agent_id });
        }

        self.assignments.remove(task_id);
        let descriptor = self.descriptors.remove(task_id);
        let observed = minutes
            .or_else(|| descriptor.as_ref().map(|d| f64::from(d.estimated_duration)))
            .unwrap_or(0.0);
        let alpha = self.config.reliability_alpha;
        let threshold = self.config.rebalance_threshold;

        let agent_type = {
            let Some(agent) = self.agents.get_mut(&agent_id) else {
                return Err(Error::AgentNotFound { id: agent_id });
            };
            agent.current_tasks.retain(|t| t != task_id);
            if success {
                agent.completed_tasks += 1;
            } else {
                agent.failed_tasks += 1;
            }
            let finished = f64::from(agent.completed_tasks + agent.failed_tasks);
            agent.average_task_duration += (observed - agent.average_task_duration) / finished;
            let outcome = if success { 1.0 } else { 0.0 };
            agent.reliability = alpha * outcome + (1.0 - alpha) * agent.reliability;
            agent.refresh_load(threshold);
            agent.last_active = Utc::now();
            agent.agent_type.clone()
        };

        if let Some(descriptor) = descriptor {
            let table = self.affinity.entry(agent_type).or_default();
            for keyword in &descriptor.keywords {
                let weight = table.entry(keyword.clone()).or_insert(0.0);
                *weight = if success {
                    *weight + AFFINITY_SUCCESS_DELTA
                } else {
                    (*weight - AFFINITY_FAILURE_DELTA).max(0.0)
                };
            }
        }

        wlog_debug!(
            "assignment: {} finished on {} (success={})",
            task_id,
            agent_id,
            success
        );
        self.events.publish(AssignmentEvent::TaskCompleted {
            task_id: task_id.to_string(),
            agent_id,
            success,
        });
        Ok(())
    }

    // ========== Rebalancing ==========

    /// Move work off overloaded agents.
    ///
    /// Each overloaded agent sheds its lowest-priority tasks to the least
    /// loaded under-loaded agent while that strictly lowers workload variance.
    pub fn rebalance(&mut self) -> RebalanceReport {
        let variance_before = self.workload_variance();
        let mut moves = Vec::new();

        let mut overloaded: Vec<(String, f64)> = self
            .agents
            .values()
            .filter(|a| a.status.is_available() && a.workload > self.config.rebalance_threshold)
            .map(|a| (a.id.clone(), a.workload))
            .collect();
        overloaded.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (from_id, _) in overloaded {
            let mut tasks = self
                .agents
                .get(&from_id)
                .map(|a| a.current_tasks.clone())
                .unwrap_or_default();
            tasks.sort_by_key(|t| Reverse(self.priority_of(t)));

            for task_id in tasks {
                let still_overloaded = self
                    .agents
                    .get(&from_id)
                    .is_some_and(|a| a.workload > self.config.rebalance_threshold);
                if !still_overloaded {
                    break;
                }
                let Some(to_id) = self.least_loaded_target(&from_id) else {
                    break;
                };
                if self.projected_variance(&from_id, &to_id) + SCORE_EPSILON
                    >= self.workload_variance()
                {
                    break;
                }
                self.move_task(&task_id, &from_id, &to_id);
                moves.push(TaskMove {
                    task_id,
                    from_agent: from_id.clone(),
                    to_agent: to_id,
                });
            }
        }

        let recommendations = self.rebalance_recommendations();
        let report = RebalanceReport {
            moves,
            recommendations,
            variance_before,
            variance_after: self.workload_variance(),
        };
        wlog!(
            "assignment: rebalance moved {} task(s), variance {:.4} -> {:.4}",
            report.moves.len(),
            report.variance_before,
            report.variance_after
        );
        report
    }

    fn rebalance_recommendations(&self) -> Vec<String> {
        let threshold = self.config.rebalance_threshold;
        let mut recommendations = Vec::new();

        let still_overloaded: Vec<&str> = self
            .agents
            .values()
            .filter(|a| a.status.is_available() && a.workload > threshold)
            .map(|a| a.id.as_str())
            .collect();
        if !still_overloaded.is_empty() {
            let spare = self.agents.values().any(|a| {
                a.status.is_available()
                    && a.has_capacity()
                    && a.workload < self.config.underload_threshold
            });
            if !spare {
                recommendations.push(format!(
                    "No spare capacity: {} above {:.0}% load; register more agents or raise their concurrency",
                    still_overloaded.join(", "),
                    threshold * 100.0
                ));
            }
        }

        for agent in self.agents.values() {
            if !agent.status.is_available() && !agent.current_tasks.is_empty() {
                recommendations.push(format!(
                    "Agent {} is {} but still holds {}; reassign them",
                    agent.id,
                    agent.status,
                    agent.current_tasks.join(", ")
                ));
            }
        }
        recommendations
    }

    fn priority_of(&self, task_id: &str) -> Priority {
        self.descriptors
            .get(task_id)
            .map(|d| d.priority)
            .unwrap_or_default()
    }

    fn least_loaded_target(&self, from_id: &str) -> Option<String> {
        let mut best: Option<&AgentInfo> = None;
        for agent in self.agents.values() {
            if agent.id == from_id
                || !agent.status.is_available()
                || !agent.has_capacity()
                || agent.workload >= self.config.underload_threshold
            {
                continue;
            }
            if best.map_or(true, |b| agent.workload < b.workload) {
                best = Some(agent);
            }
        }
        best.map(|a| a.id.clone())
    }

    fn move_task(&mut self, task_id: &str, from_id: &str, to_id: &str) {
        self.detach(task_id, from_id);
        self.attach(task_id, to_id);

        if let Some(previous) = self.assignments.remove(task_id) {
            let duration = self
                .descriptors
                .get(task_id)
                .map(|d| d.estimated_duration)
                .unwrap_or(0);
            let moved = TaskAssignment::starting_now(
                task_id,
                to_id,
                previous.score,
                format!("rebalanced from {from_id}"),
                duration,
            );
            self.assignments.insert(task_id.to_string(), moved);
        }

        wlog_debug!("assignment: moved {} from {} to {}", task_id, from_id, to_id);
        self.events.publish(AssignmentEvent::TaskMoved {
            task_id: task_id.to_string(),
            from: from_id.to_string(),
            to: to_id.to_string(),
        });
    }

    fn available_loads(&self) -> Vec<(&str, usize, usize)> {
        self.agents
            .values()
            .filter(|a| a.status.is_available())
            .map(|a| (a.id.as_str(), a.current_tasks.len(), a.max_concurrent_tasks))
            .collect()
    }

    /// Population variance of available agents' workloads.
    pub fn workload_variance(&self) -> f64 {
        let loads: Vec<f64> = self
            .available_loads()
            .into_iter()
            .map(|(_, used, max)| load_fraction(used, max))
            .collect();
        variance(&loads)
    }

    fn projected_variance(&self, from_id: &str, to_id: &str) -> f64 {
        let loads: Vec<f64> = self
            .available_loads()
            .into_iter()
            .map(|(id, used, max)| {
                let used = if id == from_id {
                    used.saturating_sub(1)
                } else if id == to_id {
                    used + 1
                } else {
                    used
                };
                load_fraction(used, max)
            })
            .collect();
        variance(&loads)
    }

    // ========== Stats ==========

    pub fn stats(&self) -> LoadStats {
        let mut stats = LoadStats {
            total_agents: self.agents.len(),
            active_assignments: self.assignments.len(),
            workload_variance: self.workload_variance(),
            ..LoadStats::default()
        };

        let mut workload_sum = 0.0;
        for agent in self.agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Overloaded => stats.overloaded += 1,
                AgentStatus::Offline => stats.offline += 1,
                AgentStatus::Error => stats.errored += 1,
            }
            if agent.status.is_available() {
                stats.available_agents += 1;
                stats.total_capacity += agent.max_concurrent_tasks;
                stats.used_capacity += agent.current_tasks.len();
                workload_sum += agent.workload;
            }
        }
        if stats.available_agents > 0 {
            stats.mean_workload = workload_sum / stats.available_agents as f64;
        }
        stats
    }
}

impl Default for AgentAssignment {
    fn default() -> Self {
        Self::new(AssignmentConfig::default())
    }
}

impl std::fmt::Debug for AgentAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentAssignment")
            .field("agents", &self.agents.len())
            .field("assignments", &self.assignments.len())
            .finish()
    }
}

fn load_fraction(used: usize, max: usize) -> f64 {
    if max == 0 {
        1.0
    } else {
        (used as f64 / max as f64).min(1.0)
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
