//! Async coordinator tests.
//!
//! Workers are simulated by tasks that answer `TaskDispatched` events on the
//! outcome channel.

use std::collections::HashSet;
use tokio::sync::mpsc;

use taskweave::core::TaskStatus;
use taskweave::orchestration::{AgentInfo, CoordinatorEvent, TaskOutcome};

use crate::fixtures::{
    independent_checklist, CoordinatorHarness, AUTH_API, LOGIN_DESIGN, LOGIN_FORM, PROVISION,
    RELEASE_PLAN,
};

fn release_team() -> Vec<AgentInfo> {
    vec![
        AgentInfo::new("coder-1", "coder", 2),
        AgentInfo::new("designer-1", "designer", 1),
        AgentInfo::new("tester-1", "tester", 1),
        AgentInfo::new("writer-1", "documenter", 1),
    ]
}

/// Test: Parallel dispatch - 4 independent tasks, 4 slots
/// Given 4 independent tasks and room for 4
/// When the coordinator dispatches
/// Then all 4 start at once
#[tokio::test]
async fn test_dispatch_four_in_parallel() {
    let mut h = CoordinatorHarness::new(
        &independent_checklist(4),
        4,
        vec![AgentInfo::new("w1", "coder", 2), AgentInfo::new("w2", "coder", 2)],
    );

    let dispatched = h.coordinator.dispatch_ready().await.unwrap();

    assert_eq!(dispatched.len(), 4);
    assert_eq!(h.coordinator.running_count().await, 4);
    let started = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, CoordinatorEvent::TaskDispatched { .. }))
        .count();
    assert_eq!(started, 4);
}

/// Test: Agent capacity caps dispatch below the parallel limit
#[tokio::test]
async fn test_agent_capacity_limits_dispatch() {
    let mut h = CoordinatorHarness::new(
        &independent_checklist(6),
        6,
        vec![AgentInfo::new("solo", "coder", 2)],
    );

    assert_eq!(h.coordinator.dispatch_ready().await.unwrap().len(), 2);
    let orch = h.orchestrator.read().await;
    assert_eq!(orch.state().ready.len(), 4);
}

/// Test: Completion frees capacity for the next task
#[tokio::test]
async fn test_completion_frees_capacity() {
    let mut h = CoordinatorHarness::new(
        &independent_checklist(3),
        1,
        vec![AgentInfo::new("w", "coder", 1)],
    );

    let first = h.coordinator.dispatch_ready().await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(h.coordinator.dispatch_ready().await.unwrap().is_empty());

    h.coordinator
        .handle_completion(&first[0].task_id, Some(10.0))
        .await
        .unwrap();
    let second = h.coordinator.dispatch_ready().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_ne!(second[0].task_id, first[0].task_id);
}

/// Test: Worker types are honored when matching agents exist
#[tokio::test]
async fn test_release_plan_routes_by_type() {
    let mut h = CoordinatorHarness::new(RELEASE_PLAN, 4, release_team());

    let dispatched = h.coordinator.dispatch_ready().await.unwrap();

    let by_task: Vec<(&str, &str)> = dispatched
        .iter()
        .map(|a| (a.task_id.as_str(), a.agent_id.as_str()))
        .collect();
    assert_eq!(by_task, vec![(AUTH_API, "coder-1"), (LOGIN_DESIGN, "designer-1")]);
}

/// Test: Full run over the release plan finishes every task in dependency order
#[tokio::test]
async fn test_full_run_respects_dependencies() {
    let mut h = CoordinatorHarness::new(RELEASE_PLAN, 4, release_team());
    let (outcome_tx, mut outcome_rx) = mpsc::channel(64);
    let mut events = std::mem::replace(&mut h.event_rx, mpsc::channel(1).1);

    let worker = tokio::spawn(async move {
        let mut order = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                CoordinatorEvent::TaskDispatched { task_id, .. } => {
                    order.push(task_id.clone());
                    let _ = outcome_tx
                        .send(TaskOutcome::Completed {
                            task_id,
                            minutes: Some(1.0),
                        })
                        .await;
                }
                CoordinatorEvent::AllTasksComplete => break,
                _ => {}
            }
        }
        order
    });

    let summary = h.coordinator.run(&mut outcome_rx).await.unwrap();
    let order = worker.await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.dispatched, 5);
    assert!(!order.contains(&PROVISION.to_string()));

    let position = |id: &str| order.iter().position(|t| t == id).unwrap();
    assert!(position(AUTH_API) < position(LOGIN_FORM));
    assert!(position(LOGIN_DESIGN) < position(LOGIN_FORM));

    let orch = h.orchestrator.read().await;
    assert!(orch.is_complete());
    let balancer = h.assignment.read().await;
    let finished: u32 = balancer.agents().map(|a| a.completed_tasks).sum();
    assert_eq!(finished, 5);
    assert_eq!(balancer.assignments().count(), 0);
}

/// Test: A failure stops dependents and the run reports what is left
#[tokio::test]
async fn test_failure_leaves_dependents_unfinished() {
    let mut h = CoordinatorHarness::new(RELEASE_PLAN, 4, release_team());
    let (outcome_tx, mut outcome_rx) = mpsc::channel(64);
    let mut events = std::mem::replace(&mut h.event_rx, mpsc::channel(1).1);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let CoordinatorEvent::TaskDispatched { task_id, .. } = event {
                let outcome = if task_id == AUTH_API {
                    TaskOutcome::Failed {
                        task_id,
                        error: "token store unavailable".into(),
                    }
                } else {
                    TaskOutcome::Completed {
                        task_id,
                        minutes: None,
                    }
                };
                let _ = outcome_tx.send(outcome).await;
            }
        }
    });

    let summary = h.coordinator.run(&mut outcome_rx).await.unwrap();

    assert_eq!(summary.failed, vec![AUTH_API]);
    assert_eq!(summary.completed, vec![LOGIN_DESIGN]);
    let remaining: HashSet<&str> = summary.remaining.iter().map(String::as_str).collect();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.contains(LOGIN_FORM));

    let orch = h.orchestrator.read().await;
    assert_eq!(orch.get_task(AUTH_API).unwrap().status, TaskStatus::Failed);
    let mut stuck = orch.permanently_blocked();
    stuck.sort();
    assert_eq!(stuck.len(), 3);
}

/// Test: Closing the outcome channel ends the run cleanly
#[tokio::test]
async fn test_closed_outcome_channel_stops_run() {
    let mut h = CoordinatorHarness::new(
        &independent_checklist(2),
        2,
        vec![AgentInfo::new("w", "coder", 2)],
    );
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<TaskOutcome>(1);
    drop(outcome_tx);

    let summary = h.coordinator.run(&mut outcome_rx).await.unwrap();

    assert_eq!(summary.dispatched, 2);
    assert!(summary.completed.is_empty());
    assert_eq!(summary.remaining.len(), 2);
}
