//! Async driver tying the orchestrator to the load balancer.
//!
//! The [`Coordinator`] pulls ready tasks from a [`TaskOrchestrator`], asks
//! [`AgentAssignment`] where each should run, and feeds worker outcomes back
//! into both. Both halves sit behind `tokio::sync::RwLock` so other tasks can
//! observe them while a run is in progress.

use crate::error::{Error, Result};
use crate::orchestration::agent::{TaskAssignment, TaskDescriptor};
use crate::orchestration::assignment::{AgentAssignment, AssignmentConstraints, RebalanceReport};
use crate::orchestration::orchestrator::TaskOrchestrator;
use crate::{wlog, wlog_debug, wlog_warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Lifecycle notifications emitted while coordinating.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    TaskDispatched {
        task_id: String,
        agent_id: String,
        score: f64,
    },
    TaskCompleted {
        task_id: String,
        newly_ready: Vec<String>,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    TaskMoved {
        task_id: String,
        from: String,
        to: String,
    },
    /// Nothing is running and nothing more can be dispatched.
    Stalled {
        remaining: Vec<String>,
    },
    AllTasksComplete,
}

/// Report from a worker about a dispatched task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        task_id: String,
        /// Observed duration, if the worker measured one.
        minutes: Option<f64>,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub dispatched: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Tasks left unfinished when the run stopped.
    pub remaining: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.remaining.is_empty()
    }
}

pub struct Coordinator {
    orchestrator: Arc<RwLock<TaskOrchestrator>>,
    assignment: Arc<RwLock<AgentAssignment>>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    summary: RunSummary,
}

impl Coordinator {
    pub fn new(
        orchestrator: Arc<RwLock<TaskOrchestrator>>,
        assignment: Arc<RwLock<AgentAssignment>>,
        event_tx: mpsc::Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            orchestrator,
            assignment,
            event_tx,
            summary: RunSummary::default(),
        }
    }

    pub fn orchestrator(&self) -> Arc<RwLock<TaskOrchestrator>> {
        Arc::clone(&self.orchestrator)
    }

    pub fn assignment(&self) -> Arc<RwLock<AgentAssignment>> {
        Arc::clone(&self.assignment)
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub async fn running_count(&self) -> usize {
        self.orchestrator.read().await.state().running.len()
    }

    /// Assign and start ready tasks, up to the orchestrator's free slots.
    ///
    /// A task's preferred worker type is tried first; if no such agent is
    /// eligible, any agent may take it. Tasks no agent can take stay ready.
    pub async fn dispatch_ready(&mut self) -> Result<Vec<TaskAssignment>> {
        let (slots, candidates) = {
            let orch = self.orchestrator.read().await;
            let slots = orch
                .max_parallel_tasks()
                .saturating_sub(orch.state().running.len());
            let candidates: Vec<TaskDescriptor> = orch
                .ready_tasks()
                .iter()
                .filter_map(|id| orch.get_task(id))
                .map(TaskDescriptor::from)
                .collect();
            (slots, candidates)
        };

        let mut dispatched = Vec::new();
        for task in candidates {
            if dispatched.len() >= slots {
                break;
            }

            let choice = {
                let mut balancer = self.assignment.write().await;
                let preferred = task.agent_type.as_deref().and_then(|t| {
                    balancer.assign_task(&task, &AssignmentConstraints::new().prefer_type(t))
                });
                match preferred {
                    Some(a) => Some(a),
                    None => balancer.assign_task(&task, &AssignmentConstraints::default()),
                }
            };
            let Some(assignment) = choice else {
                wlog_debug!("coordinator: no agent available for {}", task.id);
                continue;
            };

            self.commit(&assignment).await?;

            let _ = self
                .event_tx
                .send(CoordinatorEvent::TaskDispatched {
                    task_id: assignment.task_id.clone(),
                    agent_id: assignment.agent_id.clone(),
                    score: assignment.score,
                })
                .await;
            dispatched.push(assignment);
        }

        self.summary.dispatched += dispatched.len();
        Ok(dispatched)
    }

    /// Record a balancer placement in the orchestrator and start the task.
    ///
    /// The task may have changed state since the ready snapshot was taken.
    /// On failure the placement is handed back to the balancer.
    async fn commit(&self, assignment: &TaskAssignment) -> Result<()> {
        let recorded = {
            let mut orch = self.orchestrator.write().await;
            orch.record_assignment(assignment.clone())
                .and_then(|()| orch.start_task(&assignment.task_id))
        };
        if let Err(e) = recorded {
            wlog_warn!(
                "coordinator: could not start {} on {}: {}",
                assignment.task_id,
                assignment.agent_id,
                e
            );
            self.assignment
                .write()
                .await
                .release_task(&assignment.task_id);
            return Err(e);
        }
        Ok(())
    }

    /// Record a successful outcome and return the tasks it unblocked.
    pub async fn handle_completion(
        &mut self,
        task_id: &str,
        minutes: Option<f64>,
    ) -> Result<Vec<String>> {
        let (newly_ready, all_done) = {
            let mut orch = self.orchestrator.write().await;
            let newly_ready = orch.complete_task(task_id)?;
            (newly_ready, orch.is_complete())
        };
        self.release(task_id, true, minutes).await?;
        self.summary.completed.push(task_id.to_string());

        let _ = self
            .event_tx
            .send(CoordinatorEvent::TaskCompleted {
                task_id: task_id.to_string(),
                newly_ready: newly_ready.clone(),
            })
            .await;
        if all_done {
            let _ = self.event_tx.send(CoordinatorEvent::AllTasksComplete).await;
        }
        Ok(newly_ready)
    }

    pub async fn handle_failure(&mut self, task_id: &str, error: &str) -> Result<()> {
        self.orchestrator.write().await.fail_task(task_id, error)?;
        self.release(task_id, false, None).await?;
        self.summary.failed.push(task_id.to_string());

        let _ = self
            .event_tx
            .send(CoordinatorEvent::TaskFailed {
                task_id: task_id.to_string(),
                error: error.to_string(),
            })
            .await;
        Ok(())
    }

    /// Feed the outcome to the balancer. Tasks it never placed are ignored.
    async fn release(&self, task_id: &str, success: bool, minutes: Option<f64>) -> Result<()> {
        let mut balancer = self.assignment.write().await;
        match balancer.complete_task_with_duration(task_id, success, minutes) {
            Ok(()) => Ok(()),
            Err(Error::NotAssigned(_)) => {
                wlog_debug!("coordinator: {} was not placed by the balancer", task_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Rebalance agents and mirror every move into the orchestrator.
    pub async fn rebalance(&mut self) -> Result<RebalanceReport> {
        let (report, moved) = {
            let mut balancer = self.assignment.write().await;
            let report = balancer.rebalance();
            let moved: Vec<TaskAssignment> = report
                .moves
                .iter()
                .filter_map(|m| balancer.assignment_for(&m.task_id).cloned())
                .collect();
            (report, moved)
        };

        {
            let mut orch = self.orchestrator.write().await;
            for assignment in moved {
                orch.record_assignment(assignment)?;
            }
        }

        for m in &report.moves {
            let _ = self
                .event_tx
                .send(CoordinatorEvent::TaskMoved {
                    task_id: m.task_id.clone(),
                    from: m.from_agent.clone(),
                    to: m.to_agent.clone(),
                })
                .await;
        }
        for recommendation in &report.recommendations {
            wlog_warn!("coordinator: {}", recommendation);
        }
        Ok(report)
    }

    async fn unfinished(&self) -> Vec<String> {
        let orch = self.orchestrator.read().await;
        orch.tasks()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect()
    }

    /// Dispatch and process outcomes until every task is finished or no
    /// further progress is possible.
    pub async fn run(&mut self, outcomes: &mut mpsc::Receiver<TaskOutcome>) -> Result<RunSummary> {
        {
            let mut orch = self.orchestrator.write().await;
            orch.update_ready_tasks();
        }

        loop {
            if self.orchestrator.read().await.is_complete() {
                break;
            }

            self.dispatch_ready().await?;

            if self.running_count().await == 0 {
                let remaining = self.unfinished().await;
                wlog_warn!(
                    "coordinator: stalled with {} unfinished task(s)",
                    remaining.len()
                );
                let _ = self
                    .event_tx
                    .send(CoordinatorEvent::Stalled {
                        remaining: remaining.clone(),
                    })
                    .await;
                break;
            }

            match outcomes.recv().await {
                Some(TaskOutcome::Completed { task_id, minutes }) => {
                    self.handle_completion(&task_id, minutes).await?;
                }
                Some(TaskOutcome::Failed { task_id, error }) => {
                    self.handle_failure(&task_id, &error).await?;
                }
                None => {
                    wlog_warn!("coordinator: outcome channel closed");
                    break;
                }
            }
        }

        self.summary.remaining = self.unfinished().await;
        wlog!(
            "coordinator: run finished ({} completed, {} failed, {} remaining)",
            self.summary.completed.len(),
            self.summary.failed.len(),
            self.summary.remaining.len()
        );
        Ok(std::mem::take(&mut self.summary))
    }
}
