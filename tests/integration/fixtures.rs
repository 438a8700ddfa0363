//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Predefined checklist documents
//! - Predefined graph shapes
//! - A coordinator harness with simulated workers

#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use taskweave::core::{DependencyGraph, DependencyType, Priority, TaskOptions};
use taskweave::orchestration::{
    AgentAssignment, AgentInfo, Coordinator, CoordinatorEvent, TaskOrchestrator,
};

/// A small release plan with sections, markers and loose references.
pub const RELEASE_PLAN: &str = "\
# Release 2.0

## Backend
- [x] Provision database [P1] [2h] @devops
- [ ] Implement auth API [P1] [3h] @coder #api depends:provision-database-1
  Token issuance and refresh.
- [ ] Write auth tests [P2] [1h] @tester #testing depends:implement-auth-api-2

## Frontend
- [ ] Design login page [P2] [90m] @designer [parallel]
- [ ] Build login form [P2] [2h] @coder depends:design-login, auth

## Docs
- [ ] Document auth flow [P3] [45m] @documenter depends:implement-auth
";

pub const PROVISION: &str = "provision-database-1";
pub const AUTH_API: &str = "implement-auth-api-2";
pub const AUTH_TESTS: &str = "write-auth-tests-3";
pub const LOGIN_DESIGN: &str = "design-login-page-4";
pub const LOGIN_FORM: &str = "build-login-form-5";
pub const AUTH_DOCS: &str = "document-auth-flow-6";

/// A -> B -> D and A -> C -> D with durations 10, 20, 5, 15.
pub fn diamond() -> DependencyGraph {
    let mut g = DependencyGraph::new();
    g.add_task("A", "Task A", TaskOptions::new().priority(Priority::P1).duration(10))
        .unwrap();
    g.add_task("B", "Task B", TaskOptions::new().priority(Priority::P1).duration(20))
        .unwrap();
    g.add_task("C", "Task C", TaskOptions::new().priority(Priority::P2).duration(5))
        .unwrap();
    g.add_task("D", "Task D", TaskOptions::new().priority(Priority::P1).duration(15))
        .unwrap();
    g.add_dependency("A", "B", DependencyType::Blocks).unwrap();
    g.add_dependency("A", "C", DependencyType::Blocks).unwrap();
    g.add_dependency("B", "D", DependencyType::Blocks).unwrap();
    g.add_dependency("C", "D", DependencyType::Blocks).unwrap();
    g
}

/// `n` tasks each depending on the previous one.
pub fn chain(n: usize) -> DependencyGraph {
    let mut g = DependencyGraph::new();
    for i in 0..n {
        g.add_task(&format!("t{i}"), &format!("Task {i}"), TaskOptions::new())
            .unwrap();
        if i > 0 {
            g.add_dependency(&format!("t{}", i - 1), &format!("t{i}"), DependencyType::Blocks)
                .unwrap();
        }
    }
    g
}

/// A checklist of `n` unrelated tasks.
pub fn independent_checklist(n: usize) -> String {
    (0..n)
        .map(|i| format!("- [ ] Job {i} [30m]\n"))
        .collect()
}

/// A coordinator wired to fresh shared state.
pub struct CoordinatorHarness {
    pub coordinator: Coordinator,
    pub orchestrator: Arc<RwLock<TaskOrchestrator>>,
    pub assignment: Arc<RwLock<AgentAssignment>>,
    pub event_rx: mpsc::Receiver<CoordinatorEvent>,
}

impl CoordinatorHarness {
    pub fn new(document: &str, max_parallel: usize, agents: Vec<AgentInfo>) -> Self {
        let mut orch = TaskOrchestrator::with_max_parallel(max_parallel);
        orch.load_document(document);
        let mut balancer = AgentAssignment::default();
        for agent in agents {
            balancer.register_agent(agent).unwrap();
        }

        let orchestrator = Arc::new(RwLock::new(orch));
        let assignment = Arc::new(RwLock::new(balancer));
        let (tx, event_rx) = mpsc::channel(256);
        let coordinator = Coordinator::new(Arc::clone(&orchestrator), Arc::clone(&assignment), tx);

        Self {
            coordinator,
            orchestrator,
            assignment,
            event_rx,
        }
    }

    /// Drain events that are already queued.
    pub fn drain_events(&mut self) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
