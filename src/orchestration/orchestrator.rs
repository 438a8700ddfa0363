//! Task orchestrator.
//!
//! The [`TaskOrchestrator`] owns one [`DependencyGraph`] built from parsed
//! checklist tasks and tracks each task through its lifecycle:
//!
//! ```text
//! pending -> ready -> assigned -> in_progress -> completed | failed
//!              \-> blocked (recomputed after every transition)
//! ```
//!
//! It also performs a quick greedy match of ready work onto a set of agents.
//! The weighted, stateful matcher lives in [`crate::orchestration::AgentAssignment`].

use crate::config::OrchestratorConfig;
use crate::core::analysis::{Bottleneck, CriticalPath};
use crate::core::dag::{DependencyGraph, ParallelBatch};
use crate::core::task::{DependencyType, TaskStatus};
use crate::error::{Error, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::orchestration::agent::{AgentInfo, TaskAssignment};
use crate::orchestration::keywords::suitability;
use crate::orchestration::parser::{parse_checklist, slugify, ParsedTask};
use crate::{wlog, wlog_debug, wlog_warn};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Score bonus when a task's worker hint names the agent's type.
const TYPE_MATCH_BONUS: f64 = 10.0;

/// Lifecycle notifications emitted by a [`TaskOrchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    GraphBuilt {
        tasks: usize,
        dependencies: usize,
    },
    /// A dependency edge was dropped during the build because it would close a cycle.
    DependencySkipped {
        from: String,
        to: String,
        reason: String,
    },
    TaskReady {
        task_id: String,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
        score: f64,
    },
    TaskStarted {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    TaskCancelled {
        task_id: String,
    },
    TaskRequeued {
        task_id: String,
    },
    /// Every non-cancelled task is completed.
    AllTasksComplete,
}

/// The six disjoint lifecycle partitions.
///
/// `running` holds both assigned and in-progress tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub pending: BTreeSet<String>,
    pub ready: BTreeSet<String>,
    pub running: BTreeSet<String>,
    pub completed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub blocked: BTreeSet<String>,
}

impl OrchestratorState {
    fn remove(&mut self, id: &str) {
        self.pending.remove(id);
        self.ready.remove(id);
        self.running.remove(id);
        self.completed.remove(id);
        self.failed.remove(id);
        self.blocked.remove(id);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
            + self.ready.len()
            + self.running.len()
            + self.completed.len()
            + self.failed.len()
            + self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Two tasks share an id; the later one was dropped.
    DuplicateTask,
    /// A reference matched no task.
    UnresolvedDependency,
    /// A reference matched only by name substring or id prefix.
    FuzzyDependency,
    /// A resolved edge was dropped because it would close a cycle.
    DependencySkipped,
}

/// A non-fatal problem found while building the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub task_id: String,
    /// The raw reference or id involved.
    pub reference: String,
    pub message: String,
}

/// Outcome of [`TaskOrchestrator::build_dependency_graph`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub task_count: usize,
    pub dependency_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }
}

/// Counts per lifecycle state plus completion estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    /// Completed share of non-cancelled tasks, 0 to 100.
    pub percent_complete: f64,
    /// Sum of batch durations for batches with outstanding work.
    pub estimated_remaining_minutes: u64,
}

/// Scheduling analysis with human-readable advice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOptimization {
    pub critical_path: CriticalPath,
    pub bottlenecks: Vec<Bottleneck>,
    pub batches: Vec<ParallelBatch>,
    pub recommendations: Vec<String>,
}

/// Serializable hand-off of every task and assignment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub generated_at: DateTime<Utc>,
    pub tasks: Vec<ParsedTask>,
    pub assignments: Vec<TaskAssignment>,
    pub state: OrchestratorState,
    pub cancelled: BTreeSet<String>,
}

/// How a dependency reference was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    ExactId,
    ExactName,
    NameSubstring,
    IdPrefix,
}

pub struct TaskOrchestrator {
    graph: DependencyGraph,
    tasks: Vec<ParsedTask>,
    positions: HashMap<String, usize>,
    state: OrchestratorState,
    cancelled: BTreeSet<String>,
    assignments: BTreeMap<String, TaskAssignment>,
    diagnostics: Vec<Diagnostic>,
    max_parallel_tasks: usize,
    events: EventBus<OrchestratorEvent>,
}

impl TaskOrchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_max_parallel(config.max_parallel_tasks)
    }

    pub fn with_max_parallel(max_parallel_tasks: usize) -> Self {
        Self {
            graph: DependencyGraph::new(),
            tasks: Vec::new(),
            positions: HashMap::new(),
            state: OrchestratorState::default(),
            cancelled: BTreeSet::new(),
            assignments: BTreeMap::new(),
            diagnostics: Vec::new(),
            max_parallel_tasks,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<OrchestratorEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ========== Accessors ==========

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn cancelled(&self) -> &BTreeSet<String> {
        &self.cancelled
    }

    pub fn tasks(&self) -> &[ParsedTask] {
        &self.tasks
    }

    pub fn get_task(&self, id: &str) -> Option<&ParsedTask> {
        self.positions.get(id).map(|&i| &self.tasks[i])
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn assignment_for(&self, task_id: &str) -> Option<&TaskAssignment> {
        self.assignments.get(task_id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &TaskAssignment> {
        self.assignments.values()
    }

    pub fn max_parallel_tasks(&self) -> usize {
        self.max_parallel_tasks
    }

    /// Ready task ids, most urgent first.
    pub fn ready_tasks(&self) -> Vec<String> {
        let completed = self.completed_set();
        self.graph
            .get_ready_tasks(&completed)
            .into_iter()
            .filter(|n| self.state.ready.contains(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Check whether every non-cancelled task is completed.
    pub fn is_complete(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Cancelled))
    }

    // ========== Building ==========

    /// Parse a checklist document and build the graph from it.
    pub fn load_document(&mut self, text: &str) -> BuildReport {
        self.build_dependency_graph(parse_checklist(text))
    }

    /// Replace all state with a graph built from `tasks`.
    ///
    /// Checked tasks start completed; the rest start pending and are then
    /// classified as ready or blocked. Problems are reported as diagnostics
    /// and never abort the build.
    pub fn build_dependency_graph(&mut self, tasks: Vec<ParsedTask>) -> BuildReport {
        self.graph.clear();
        self.tasks.clear();
        self.positions.clear();
        self.state = OrchestratorState::default();
        self.cancelled.clear();
        self.assignments.clear();
        self.diagnostics.clear();

        for mut task in tasks {
            if let Err(e) = self.graph.add_node(task.to_node()) {
                self.diagnose(
                    DiagnosticKind::DuplicateTask,
                    &task.id,
                    &task.id,
                    e.to_string(),
                );
                continue;
            }
            let status = if task.status == TaskStatus::Completed {
                TaskStatus::Completed
            } else {
                TaskStatus::Pending
            };
            task.status = status;
            task.assigned_agent = None;
            let id = task.id.clone();
            self.positions.insert(id.clone(), self.tasks.len());
            self.tasks.push(task);
            self.place(&id, status);
        }

        let references: Vec<(String, Vec<String>)> = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();

        for (task_id, refs) in references {
            for reference in refs {
                self.link_dependency(&task_id, &reference);
            }
        }

        self.update_ready_tasks();

        let report = BuildReport {
            task_count: self.graph.task_count(),
            dependency_count: self.graph.dependency_count(),
            diagnostics: self.diagnostics.clone(),
        };
        wlog!(
            "orchestrator: built graph with {} tasks, {} dependencies, {} diagnostics",
            report.task_count,
            report.dependency_count,
            report.diagnostics.len()
        );
        self.events.publish(OrchestratorEvent::GraphBuilt {
            tasks: report.task_count,
            dependencies: report.dependency_count,
        });
        report
    }

    fn link_dependency(&mut self, task_id: &str, reference: &str) {
        let Some((dep_id, how)) = self.resolve_reference(reference, task_id) else {
            self.diagnose(
                DiagnosticKind::UnresolvedDependency,
                task_id,
                reference,
                format!("dependency '{reference}' of {task_id} matches no task"),
            );
            return;
        };

        if matches!(how, Resolution::NameSubstring | Resolution::IdPrefix) {
            self.diagnose(
                DiagnosticKind::FuzzyDependency,
                task_id,
                reference,
                format!("dependency '{reference}' of {task_id} loosely matched {dep_id}"),
            );
        }

        if let Err(e) = self
            .graph
            .add_dependency(&dep_id, task_id, DependencyType::Blocks)
        {
            let reason = e.to_string();
            self.diagnose(
                DiagnosticKind::DependencySkipped,
                task_id,
                reference,
                format!("skipped {dep_id} -> {task_id}: {reason}"),
            );
            self.events.publish(OrchestratorEvent::DependencySkipped {
                from: dep_id,
                to: task_id.to_string(),
                reason,
            });
        }
    }

    /// Match a reference against exact id, exact name (case-insensitive),
    /// name substring, then id prefix of the reference's slug.
    fn resolve_reference(&self, reference: &str, self_id: &str) -> Option<(String, Resolution)> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let others = || self.tasks.iter().filter(move |t| t.id != self_id);

        if reference != self_id && self.positions.contains_key(reference) {
            return Some((reference.to_string(), Resolution::ExactId));
        }
        if let Some(t) = others().find(|t| t.name.eq_ignore_ascii_case(reference)) {
            return Some((t.id.clone(), Resolution::ExactName));
        }
        let lowered = reference.to_lowercase();
        if let Some(t) = others().find(|t| t.name.to_lowercase().contains(&lowered)) {
            return Some((t.id.clone(), Resolution::NameSubstring));
        }
        let slug = slugify(reference);
        others()
            .find(|t| t.id.starts_with(&slug))
            .map(|t| (t.id.clone(), Resolution::IdPrefix))
    }

    fn diagnose(&mut self, kind: DiagnosticKind, task_id: &str, reference: &str, message: String) {
        match kind {
            DiagnosticKind::FuzzyDependency => wlog_debug!("orchestrator: {}", message),
            _ => wlog_warn!("orchestrator: {}", message),
        }
        self.diagnostics.push(Diagnostic {
            kind,
            task_id: task_id.to_string(),
            reference: reference.to_string(),
            message,
        });
    }

    // ========== Readiness ==========

    /// Reclassify every waiting task as ready or blocked.
    ///
    /// Running and terminal tasks are left alone. Returns the ids that became
    /// ready, in priority order.
    pub fn update_ready_tasks(&mut self) -> Vec<String> {
        let completed = self.completed_set();
        let ready: Vec<String> = self
            .graph
            .get_ready_tasks(&completed)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();
        let ready_set: HashSet<&String> = ready.iter().collect();

        let waiting: Vec<(String, TaskStatus)> = self
            .tasks
            .iter()
            .filter(|t| !t.status.is_terminal() && !t.status.is_running())
            .map(|t| (t.id.clone(), t.status))
            .collect();

        let mut became_ready = HashSet::new();
        for (id, status) in waiting {
            let next = if ready_set.contains(&id) {
                TaskStatus::Ready
            } else {
                TaskStatus::Blocked
            };
            if next != status {
                self.place(&id, next);
                if next == TaskStatus::Ready {
                    became_ready.insert(id);
                }
            }
        }

        let newly_ready: Vec<String> = ready
            .into_iter()
            .filter(|id| became_ready.contains(id))
            .collect();
        for id in &newly_ready {
            self.events.publish(OrchestratorEvent::TaskReady {
                task_id: id.clone(),
            });
        }
        newly_ready
    }

    /// Blocked tasks that can never run without a requeue: some transitive
    /// blocking predecessor failed or was cancelled.
    pub fn permanently_blocked(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .filter(|t| self.has_dead_ancestor(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }

    fn has_dead_ancestor(&self, id: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for dep in self.graph.get_dependencies(&current).unwrap_or_default() {
                if self.graph.dependency_kind(&dep, &current) != Some(DependencyType::Blocks) {
                    continue;
                }
                if self.state.failed.contains(&dep) || self.cancelled.contains(&dep) {
                    return true;
                }
                if seen.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
        false
    }

    // ========== Lifecycle ==========

    /// Record an assignment decision.
    ///
    /// A ready task becomes assigned. An assigned or in-progress task keeps
    /// its status and moves to the new agent.
    pub fn record_assignment(&mut self, assignment: TaskAssignment) -> Result<()> {
        let status = self.status_of(&assignment.task_id)?;
        match status {
            TaskStatus::Ready => self.place(&assignment.task_id, TaskStatus::Assigned),
            TaskStatus::Assigned | TaskStatus::InProgress => {}
            from => {
                return Err(Error::InvalidTransition {
                    task: assignment.task_id.clone(),
                    from,
                    to: TaskStatus::Assigned,
                })
            }
        }

        if let Some(task) = self.task_mut(&assignment.task_id) {
            task.assigned_agent = Some(assignment.agent_id.clone());
        }
        wlog_debug!(
            "orchestrator: {} assigned to {} (score {:.2})",
            assignment.task_id,
            assignment.agent_id,
            assignment.score
        );
        self.events.publish(OrchestratorEvent::TaskAssigned {
            task_id: assignment.task_id.clone(),
            agent_id: assignment.agent_id.clone(),
            score: assignment.score,
        });
        self.assignments
            .insert(assignment.task_id.clone(), assignment);
        Ok(())
    }

    pub fn start_task(&mut self, id: &str) -> Result<()> {
        self.transition(
            id,
            &[TaskStatus::Ready, TaskStatus::Assigned],
            TaskStatus::InProgress,
        )?;
        if let Some(task) = self.task_mut(id) {
            task.started_at = Some(Utc::now());
        }
        self.events.publish(OrchestratorEvent::TaskStarted {
            task_id: id.to_string(),
        });
        Ok(())
    }

    /// Mark a task completed and return the dependents it unblocked.
    pub fn complete_task(&mut self, id: &str) -> Result<Vec<String>> {
        self.transition(
            id,
            &[TaskStatus::Ready, TaskStatus::Assigned, TaskStatus::InProgress],
            TaskStatus::Completed,
        )?;
        if let Some(task) = self.task_mut(id) {
            task.completed_at = Some(Utc::now());
        }
        wlog_debug!("orchestrator: completed {}", id);
        self.events.publish(OrchestratorEvent::TaskCompleted {
            task_id: id.to_string(),
        });

        let newly_ready = self.update_ready_tasks();
        if self.is_complete() {
            wlog!("orchestrator: all tasks complete");
            self.events.publish(OrchestratorEvent::AllTasksComplete);
        }
        Ok(newly_ready)
    }

    /// Mark a task failed. Its dependents stay blocked until it is requeued.
    pub fn fail_task(&mut self, id: &str, error: &str) -> Result<()> {
        self.transition(
            id,
            &[TaskStatus::Ready, TaskStatus::Assigned, TaskStatus::InProgress],
            TaskStatus::Failed,
        )?;
        if let Some(task) = self.task_mut(id) {
            task.error = Some(error.to_string());
            task.completed_at = Some(Utc::now());
        }
        wlog_warn!("orchestrator: {} failed: {}", id, error);
        self.events.publish(OrchestratorEvent::TaskFailed {
            task_id: id.to_string(),
            error: error.to_string(),
        });
        self.update_ready_tasks();
        Ok(())
    }

    pub fn cancel_task(&mut self, id: &str) -> Result<()> {
        let status = self.status_of(id)?;
        if status.is_terminal() {
            return Err(Error::InvalidTransition {
                task: id.to_string(),
                from: status,
                to: TaskStatus::Cancelled,
            });
        }
        self.place(id, TaskStatus::Cancelled);
        self.events.publish(OrchestratorEvent::TaskCancelled {
            task_id: id.to_string(),
        });
        self.update_ready_tasks();
        if self.is_complete() {
            self.events.publish(OrchestratorEvent::AllTasksComplete);
        }
        Ok(())
    }

    /// Put a failed or cancelled task back in line.
    pub fn requeue_task(&mut self, id: &str) -> Result<()> {
        self.transition(
            id,
            &[TaskStatus::Failed, TaskStatus::Cancelled],
            TaskStatus::Pending,
        )?;
        if let Some(task) = self.task_mut(id) {
            task.error = None;
            task.assigned_agent = None;
            task.started_at = None;
            task.completed_at = None;
        }
        self.assignments.remove(id);
        wlog_debug!("orchestrator: requeued {}", id);
        self.events.publish(OrchestratorEvent::TaskRequeued {
            task_id: id.to_string(),
        });
        self.update_ready_tasks();
        Ok(())
    }

    fn transition(&mut self, id: &str, allowed: &[TaskStatus], to: TaskStatus) -> Result<()> {
        let from = self.status_of(id)?;
        if !allowed.contains(&from) {
            return Err(Error::InvalidTransition {
                task: id.to_string(),
                from,
                to,
            });
        }
        self.place(id, to);
        Ok(())
    }

    fn status_of(&self, id: &str) -> Result<TaskStatus> {
        self.get_task(id)
            .map(|t| t.status)
            .ok_or_else(|| Error::UnknownTask(id.to_string()))
    }

    fn task_mut(&mut self, id: &str) -> Option<&mut ParsedTask> {
        let index = *self.positions.get(id)?;
        self.tasks.get_mut(index)
    }

    /// Move a task into the partition for `status` and record it on the task.
    fn place(&mut self, id: &str, status: TaskStatus) {
        self.state.remove(id);
        self.cancelled.remove(id);
        let id_owned = id.to_string();
        match status {
            TaskStatus::Pending => self.state.pending.insert(id_owned),
            TaskStatus::Ready => self.state.ready.insert(id_owned),
            TaskStatus::Assigned | TaskStatus::InProgress => self.state.running.insert(id_owned),
            TaskStatus::Completed => self.state.completed.insert(id_owned),
            TaskStatus::Failed => self.state.failed.insert(id_owned),
            TaskStatus::Blocked => self.state.blocked.insert(id_owned),
            TaskStatus::Cancelled => self.cancelled.insert(id_owned),
        };
        if let Some(task) = self.task_mut(id) {
            task.status = status;
        }
    }

    fn completed_set(&self) -> HashSet<String> {
        self.state.completed.iter().cloned().collect()
    }

    // ========== Assignment ==========

    /// Greedily hand ready tasks to agents.
    ///
    /// Free slots (`max_parallel_tasks - running`) are shared among available
    /// agents in proportion to their spare workload, then each ready task goes
    /// to the agent with the best `remaining + type match + keyword` score.
    pub fn assign_to_agents(&mut self, agents: &[AgentInfo]) -> Vec<TaskAssignment> {
        let slots = self
            .max_parallel_tasks
            .saturating_sub(self.state.running.len());
        let ready = self.ready_tasks();
        if slots == 0 || ready.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<&AgentInfo> = agents
            .iter()
            .filter(|a| a.status.is_available() && a.has_capacity())
            .collect();
        let mut remaining = distribute_slots(slots, &candidates);

        let mut made = Vec::new();
        for task_id in ready {
            let Some(task) = self.get_task(&task_id).cloned() else {
                continue;
            };

            let mut best: Option<(usize, f64, u32, bool)> = None;
            for (i, agent) in candidates.iter().enumerate() {
                if remaining[i] == 0 {
                    continue;
                }
                let type_match = task
                    .agent_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&agent.agent_type));
                let keyword_score = suitability(&agent.agent_type, &task.name, &task.tags);
                let score = remaining[i] as f64
                    + if type_match { TYPE_MATCH_BONUS } else { 0.0 }
                    + f64::from(keyword_score);
                if best.map_or(true, |(_, s, _, _)| score > s) {
                    best = Some((i, score, keyword_score, type_match));
                }
            }

            let Some((i, score, keyword_score, type_match)) = best else {
                break;
            };
            let reason = format!(
                "{} free slot(s){}, keyword score {}",
                remaining[i],
                if type_match { ", worker type match" } else { "" },
                keyword_score
            );
            remaining[i] -= 1;

            let assignment = TaskAssignment::starting_now(
                &task.id,
                &candidates[i].id,
                score,
                reason,
                task.estimated_duration,
            );
            if self.record_assignment(assignment.clone()).is_ok() {
                made.push(assignment);
            }
        }

        wlog!(
            "orchestrator: assigned {} task(s) across {} agent(s)",
            made.len(),
            candidates.len()
        );
        made
    }

    // ========== Progress & Optimization ==========

    pub fn track_progress(&self) -> Progress {
        let total = self.tasks.len();
        let cancelled = self.cancelled.len();
        let active = total - cancelled;
        let completed = self.state.completed.len();

        let estimated_remaining_minutes = self
            .graph
            .get_parallel_batches()
            .unwrap_or_default()
            .iter()
            .filter(|batch| {
                batch.task_ids.iter().any(|id| {
                    !self.state.completed.contains(id) && !self.cancelled.contains(id)
                })
            })
            .map(|batch| u64::from(batch.duration))
            .sum();

        Progress {
            total,
            pending: self.state.pending.len(),
            ready: self.state.ready.len(),
            running: self.state.running.len(),
            completed,
            failed: self.state.failed.len(),
            blocked: self.state.blocked.len(),
            cancelled,
            percent_complete: if active == 0 {
                0.0
            } else {
                completed as f64 * 100.0 / active as f64
            },
            estimated_remaining_minutes,
        }
    }

    /// Analyze the remaining schedule and suggest improvements.
    pub fn optimize_schedule(&self) -> Result<ScheduleOptimization> {
        let critical_path = self.graph.get_critical_path()?;
        let bottlenecks = self.graph.get_bottlenecks();
        let batches = self.graph.get_parallel_batches()?;
        let done = |id: &str| self.state.completed.contains(id);
        let on_path: HashSet<&str> = critical_path.path.iter().map(String::as_str).collect();

        let mut recommendations = Vec::new();

        for batch in &batches {
            let off_path: Vec<&str> = batch
                .task_ids
                .iter()
                .map(String::as_str)
                .filter(|id| !on_path.contains(id) && !done(id))
                .collect();
            if off_path.len() >= 2 {
                recommendations.push(format!(
                    "Run {} in parallel (level {}, off the critical path)",
                    off_path.join(", "),
                    batch.level
                ));
            }
        }

        for b in &bottlenecks {
            if b.dependent_count > 2 && !done(&b.task_id) {
                recommendations.push(format!(
                    "Prioritize or decompose {}: {} tasks depend on it",
                    b.task_id, b.dependent_count
                ));
            }
        }

        if !critical_path.path.is_empty() {
            let average = critical_path.total_duration as f64 / critical_path.path.len() as f64;
            for id in &critical_path.path {
                let Some(node) = self.graph.get_task(id) else {
                    continue;
                };
                if !done(id) && f64::from(node.estimated_duration) > 2.0 * average {
                    recommendations.push(format!(
                        "Break down {} ({}m): over twice the critical-path average of {:.1}m",
                        id, node.estimated_duration, average
                    ));
                }
            }
        }

        Ok(ScheduleOptimization {
            critical_path,
            bottlenecks,
            batches,
            recommendations,
        })
    }

    // ========== Export ==========

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            generated_at: Utc::now(),
            tasks: self.tasks.clone(),
            assignments: self.assignments.values().cloned().collect(),
            state: self.state.clone(),
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new(&OrchestratorConfig::default())
    }
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("tasks", &self.tasks.len())
            .field("ready", &self.state.ready.len())
            .field("running", &self.state.running.len())
            .field("completed", &self.state.completed.len())
            .finish()
    }
}

/// Split `slots` across agents in proportion to `1 - workload`, using the
/// largest-remainder method, capped by each agent's free concurrency.
fn distribute_slots(slots: usize, agents: &[&AgentInfo]) -> Vec<usize> {
    if agents.is_empty() {
        return Vec::new();
    }

    let mut weights: Vec<f64> = agents
        .iter()
        .map(|a| (1.0 - a.workload).clamp(0.0, 1.0))
        .collect();
    if weights.iter().sum::<f64>() <= f64::EPSILON {
        weights = vec![1.0; agents.len()];
    }
    let total: f64 = weights.iter().sum();

    let quotas: Vec<f64> = weights.iter().map(|w| slots as f64 * w / total).collect();
    let mut shares: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();

    let mut by_remainder: Vec<usize> = (0..agents.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.total_cmp(&ra)
    });
    let left = slots.saturating_sub(shares.iter().sum());
    for &i in by_remainder.iter().cycle().take(left) {
        shares[i] += 1;
    }

    // Cap by free concurrency, then hand overflow to agents with room.
    let mut overflow = 0;
    for (i, share) in shares.iter_mut().enumerate() {
        let free = agents[i].free_slots();
        if *share > free {
            overflow += *share - free;
            *share = free;
        }
    }
    for &i in &by_remainder {
        if overflow == 0 {
            break;
        }
        let room = agents[i].free_slots() - shares[i];
        let extra = room.min(overflow);
        shares[i] += extra;
        overflow -= extra;
    }
    shares
}
