//! Checklist document to schedule, end to end.

use taskweave::core::{Priority, TaskStatus};
use taskweave::orchestration::{DiagnosticKind, OrchestratorEvent, OrchestratorSnapshot, TaskOrchestrator};
use taskweave::Error;

use crate::fixtures::{
    diamond, AUTH_API, AUTH_DOCS, AUTH_TESTS, LOGIN_DESIGN, LOGIN_FORM, PROVISION, RELEASE_PLAN,
};

fn release() -> TaskOrchestrator {
    let mut orch = TaskOrchestrator::default();
    orch.load_document(RELEASE_PLAN);
    orch
}

/// Test: Markers, sections and loose references all land in the graph
#[test]
fn test_release_plan_builds_expected_graph() {
    let mut orch = TaskOrchestrator::default();
    let report = orch.load_document(RELEASE_PLAN);

    assert_eq!(report.task_count, 6);
    assert_eq!(report.dependency_count, 5);
    assert_eq!(report.count(DiagnosticKind::FuzzyDependency), 3);
    assert_eq!(report.count(DiagnosticKind::UnresolvedDependency), 0);

    let api = orch.get_task(AUTH_API).unwrap();
    assert_eq!(api.priority, Priority::P1);
    assert_eq!(api.estimated_duration, 180);
    assert_eq!(api.agent_type.as_deref(), Some("coder"));
    assert!(api.tags.contains("api"));
    assert_eq!(api.description.as_deref(), Some("Token issuance and refresh."));
    assert_eq!(api.section_path(), "Release 2.0 > Backend");

    let design = orch.get_task(LOGIN_DESIGN).unwrap();
    assert!(design.parallelizable);
    assert_eq!(design.estimated_duration, 90);

    let graph = orch.graph();
    assert!(graph.has_dependency(PROVISION, AUTH_API));
    assert!(graph.has_dependency(AUTH_API, AUTH_TESTS));
    assert!(graph.has_dependency(LOGIN_DESIGN, LOGIN_FORM));
    assert!(graph.has_dependency(AUTH_API, LOGIN_FORM));
    assert!(graph.has_dependency(AUTH_API, AUTH_DOCS));
}

/// Test: Checked items start completed and unblock their dependents
#[test]
fn test_initial_classification() {
    let orch = release();
    let state = orch.state();

    assert!(state.completed.contains(PROVISION));
    assert_eq!(orch.ready_tasks(), vec![AUTH_API, LOGIN_DESIGN]);
    assert_eq!(state.blocked.len(), 3);
    assert_eq!(orch.get_task(AUTH_TESTS).unwrap().status, TaskStatus::Blocked);
}

/// Test: Order, batches and critical path agree with the graph shape
#[test]
fn test_schedule_views() {
    let orch = release();
    let graph = orch.graph();

    assert_eq!(
        graph.get_execution_order().unwrap(),
        vec![PROVISION, AUTH_API, AUTH_TESTS, LOGIN_DESIGN, LOGIN_FORM, AUTH_DOCS]
    );

    let batches = graph.get_parallel_batches().unwrap();
    let ids: Vec<Vec<&str>> = batches
        .iter()
        .map(|b| b.task_ids.iter().map(String::as_str).collect())
        .collect();
    assert_eq!(
        ids,
        vec![
            vec![PROVISION, LOGIN_DESIGN],
            vec![AUTH_API],
            vec![AUTH_TESTS, LOGIN_FORM, AUTH_DOCS],
        ]
    );
    let durations: Vec<u32> = batches.iter().map(|b| b.duration).collect();
    assert_eq!(durations, vec![120, 180, 120]);

    let cp = graph.get_critical_path().unwrap();
    assert_eq!(cp.path, vec![PROVISION, AUTH_API, LOGIN_FORM]);
    assert_eq!(cp.total_duration, 420);
}

/// Test: A full lifecycle walk keeps progress and readiness consistent
#[test]
fn test_lifecycle_walk() {
    let mut orch = release();
    let (_, events) = orch.subscribe();

    let p = orch.track_progress();
    assert_eq!((p.total, p.completed, p.ready, p.blocked), (6, 1, 2, 3));
    assert!((p.percent_complete - 100.0 / 6.0).abs() < 1e-9);
    assert_eq!(p.estimated_remaining_minutes, 420);

    orch.start_task(AUTH_API).unwrap();
    assert_eq!(orch.track_progress().running, 1);

    let unblocked = orch.complete_task(AUTH_API).unwrap();
    assert_eq!(unblocked, vec![AUTH_TESTS, AUTH_DOCS]);

    orch.fail_task(LOGIN_DESIGN, "mockups rejected").unwrap();
    assert_eq!(orch.permanently_blocked(), vec![LOGIN_FORM]);
    assert_eq!(
        orch.get_task(LOGIN_DESIGN).unwrap().error.as_deref(),
        Some("mockups rejected")
    );

    orch.requeue_task(LOGIN_DESIGN).unwrap();
    assert!(orch.permanently_blocked().is_empty());
    assert_eq!(orch.get_task(LOGIN_DESIGN).unwrap().status, TaskStatus::Ready);

    for id in [LOGIN_DESIGN, AUTH_TESTS, AUTH_DOCS, LOGIN_FORM] {
        orch.complete_task(id).unwrap();
    }
    assert!(orch.is_complete());
    let p = orch.track_progress();
    assert_eq!(p.percent_complete, 100.0);
    assert_eq!(p.estimated_remaining_minutes, 0);

    let events: Vec<OrchestratorEvent> = events.try_iter().collect();
    assert!(events.contains(&OrchestratorEvent::AllTasksComplete));
    assert!(events.contains(&OrchestratorEvent::TaskFailed {
        task_id: LOGIN_DESIGN.to_string(),
        error: "mockups rejected".to_string(),
    }));
}

/// Test: Illegal transitions are rejected without side effects
#[test]
fn test_invalid_transitions() {
    let mut orch = release();

    let err = orch.start_task(AUTH_TESTS).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: TaskStatus::Blocked,
            to: TaskStatus::InProgress,
            ..
        }
    ));
    assert!(matches!(
        orch.complete_task(PROVISION).unwrap_err(),
        Error::InvalidTransition { .. }
    ));
    assert!(matches!(
        orch.complete_task("nope").unwrap_err(),
        Error::UnknownTask(_)
    ));
    assert_eq!(orch.track_progress().completed, 1);
}

/// Test: Cyclic and dangling references become diagnostics, never errors
#[test]
fn test_bad_references_are_reported() {
    let mut orch = TaskOrchestrator::default();
    let report = orch.load_document(
        "- [ ] Alpha depends:beta-2\n- [ ] Beta depends:alpha-1\n- [ ] Gamma depends:ghost\n",
    );

    assert_eq!(report.task_count, 3);
    assert_eq!(report.dependency_count, 1);
    assert_eq!(report.count(DiagnosticKind::DependencySkipped), 1);
    assert_eq!(report.count(DiagnosticKind::UnresolvedDependency), 1);
    assert!(orch.graph().detect_cycle().is_none());
    assert_eq!(orch.graph().get_execution_order().unwrap().len(), 3);
}

/// Test: Optimization advice and exports
#[test]
fn test_optimize_and_export() {
    let orch = release();

    let plan = orch.optimize_schedule().unwrap();
    assert_eq!(plan.critical_path.path.last().map(String::as_str), Some(LOGIN_FORM));
    assert_eq!(plan.batches.len(), 3);
    assert!(plan
        .recommendations
        .iter()
        .any(|r| r.contains(AUTH_TESTS) && r.contains(AUTH_DOCS)));

    let mermaid = orch.graph().to_mermaid();
    assert!(mermaid.starts_with("graph TD"));
    assert!(mermaid.contains("implement_auth_api_2 --> write_auth_tests_3"));

    let json = orch.to_json().unwrap();
    let snapshot: OrchestratorSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.tasks.len(), 6);
    assert!(snapshot.state.completed.contains(PROVISION));
}

/// Test: Graph analyses on a hand-built diamond
#[test]
fn test_diamond_analysis() {
    let g = diamond();

    assert_eq!(g.get_execution_order().unwrap(), vec!["A", "B", "D", "C"]);

    let stats = g.get_stats().unwrap();
    assert_eq!(stats.root_count, 1);
    assert_eq!(stats.leaf_count, 1);
    assert_eq!(stats.batch_count, 3);
    assert_eq!(stats.max_parallelism, 2);
    assert_eq!(stats.total_duration, 50);
    assert_eq!(stats.critical_path_duration, 45);

    let top = &g.get_bottlenecks()[0];
    assert_eq!(top.task_id, "A");
    assert_eq!(top.dependent_count, 3);
    assert_eq!(top.impact, 30);
}
