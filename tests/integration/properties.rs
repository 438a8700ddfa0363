//! Randomized invariants over generated graphs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use proptest::prelude::*;
use taskweave::core::{DependencyGraph, DependencyType, Priority, TaskOptions, TaskStatus};
use taskweave::orchestration::{
    AgentAssignment, AgentInfo, AgentStatus, AssignmentConstraints, ParsedTask, TaskDescriptor,
    TaskOrchestrator,
};

#[derive(Debug, Clone)]
struct Shape {
    priorities: Vec<Priority>,
    durations: Vec<u32>,
    edges: BTreeSet<(usize, usize, u8)>,
}

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::P1), Just(Priority::P2), Just(Priority::P3)]
}

// Acyclic by construction: every edge goes from a lower index to a higher one.
fn graph_strategy(max_tasks: usize) -> impl Strategy<Value = Shape> {
    (1..=max_tasks).prop_flat_map(|n| {
        (
            proptest::collection::vec(priority_strategy(), n),
            proptest::collection::vec(0u32..120, n),
            proptest::collection::vec((any::<usize>(), any::<usize>(), 0u8..3), 0..n * 2),
        )
            .prop_map(move |(priorities, durations, raw)| {
                // one edge kind per ordered pair; the first draw wins
                let mut kinds: BTreeMap<(usize, usize), u8> = BTreeMap::new();
                for (a, b, k) in raw {
                    let (a, b) = (a % n, b % n);
                    if a != b {
                        kinds.entry((a.min(b), a.max(b))).or_insert(k);
                    }
                }
                let edges = kinds.into_iter().map(|((a, b), k)| (a, b, k)).collect();
                Shape {
                    priorities,
                    durations,
                    edges,
                }
            })
    })
}

fn status_strategy() -> impl Strategy<Value = AgentStatus> {
    prop_oneof![
        3 => Just(AgentStatus::Idle),
        2 => Just(AgentStatus::Busy),
        1 => Just(AgentStatus::Overloaded),
        1 => Just(AgentStatus::Offline),
        1 => Just(AgentStatus::Error),
    ]
}

// (capacity, tasks already held, workload, status)
fn pool_strategy() -> impl Strategy<Value = Vec<AgentInfo>> {
    proptest::collection::vec((0usize..5, 0usize..5, 0.0f64..=1.0, status_strategy()), 0..6)
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (capacity, held, workload, status))| {
                    let mut agent = AgentInfo::new(&format!("a{i}"), "coder", capacity)
                        .with_workload(workload)
                        .with_status(status);
                    agent.current_tasks = (0..held.min(capacity))
                        .map(|j| format!("held-{i}-{j}"))
                        .collect();
                    agent
                })
                .collect()
        })
}

fn id(i: usize) -> String {
    format!("t{i}")
}

fn kind(k: u8) -> DependencyType {
    match k {
        0 => DependencyType::Blocks,
        1 => DependencyType::SoftDepends,
        _ => DependencyType::DataFlow,
    }
}

fn build(shape: &Shape) -> DependencyGraph {
    let mut g = DependencyGraph::new();
    for (i, (&p, &d)) in shape.priorities.iter().zip(&shape.durations).enumerate() {
        g.add_task(&id(i), &format!("Task {i}"), TaskOptions::new().priority(p).duration(d))
            .unwrap();
    }
    for &(a, b, k) in &shape.edges {
        g.add_dependency(&id(a), &id(b), kind(k)).unwrap();
    }
    g
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_order_is_topological_and_complete(shape in graph_strategy(12)) {
        let g = build(&shape);
        let order = g.get_execution_order().unwrap();

        prop_assert_eq!(order.len(), shape.priorities.len());
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
        prop_assert_eq!(position.len(), order.len());
        for &(a, b, _) in &shape.edges {
            prop_assert!(position[id(a).as_str()] < position[id(b).as_str()]);
        }
        prop_assert!(g.detect_cycle().is_none());
    }

    #[test]
    fn prop_order_picks_most_urgent_available(shape in graph_strategy(12)) {
        let g = build(&shape);
        let order = g.get_execution_order().unwrap();
        let n = shape.priorities.len();

        let mut in_degree = vec![0usize; n];
        for &(_, b, _) in &shape.edges {
            in_degree[b] += 1;
        }
        let mut available: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

        for chosen in &order {
            let expected = *available
                .iter()
                .min_by_key(|&&i| (shape.priorities[i], i))
                .unwrap();
            prop_assert_eq!(chosen, &id(expected));
            available.remove(&expected);
            for &(a, b, _) in &shape.edges {
                if a == expected {
                    in_degree[b] -= 1;
                    if in_degree[b] == 0 {
                        available.insert(b);
                    }
                }
            }
        }
    }

    #[test]
    fn prop_batches_partition_and_increase(shape in graph_strategy(12)) {
        let g = build(&shape);
        let batches = g.get_parallel_batches().unwrap();

        let mut level_of: HashMap<String, usize> = HashMap::new();
        for (i, batch) in batches.iter().enumerate() {
            prop_assert_eq!(batch.level, i);
            prop_assert!(!batch.task_ids.is_empty());
            let slowest = batch
                .task_ids
                .iter()
                .map(|t| g.get_task(t).unwrap().estimated_duration)
                .max()
                .unwrap();
            prop_assert_eq!(batch.duration, slowest);
            for t in &batch.task_ids {
                prop_assert!(level_of.insert(t.clone(), batch.level).is_none());
            }
        }
        prop_assert_eq!(level_of.len(), shape.priorities.len());
        for &(a, b, _) in &shape.edges {
            prop_assert!(level_of[&id(a)] < level_of[&id(b)]);
        }
    }

    #[test]
    fn prop_critical_path_is_a_heaviest_chain(shape in graph_strategy(10)) {
        let g = build(&shape);
        let cp = g.get_critical_path().unwrap();

        let sum: u64 = cp
            .path
            .iter()
            .map(|t| u64::from(g.get_task(t).unwrap().estimated_duration))
            .sum();
        prop_assert_eq!(cp.total_duration, sum);
        for pair in cp.path.windows(2) {
            prop_assert!(g.has_dependency(&pair[0], &pair[1]));
        }

        // no chain through the graph is heavier
        let order = g.get_execution_order().unwrap();
        let mut best: HashMap<String, u64> = HashMap::new();
        for t in &order {
            let own = u64::from(g.get_task(t).unwrap().estimated_duration);
            let before = g
                .get_dependencies(t)
                .unwrap()
                .iter()
                .map(|d| best[d])
                .max()
                .unwrap_or(0);
            best.insert(t.clone(), before + own);
        }
        prop_assert_eq!(cp.total_duration, best.values().copied().max().unwrap_or(0));
    }

    #[test]
    fn prop_ready_means_blockers_done(
        shape in graph_strategy(12),
        done_mask in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let g = build(&shape);
        let n = shape.priorities.len();
        let completed: HashSet<String> =
            (0..n).filter(|&i| done_mask[i]).map(id).collect();

        let ready: HashSet<String> =
            g.get_ready_tasks(&completed).into_iter().map(|t| t.id.clone()).collect();

        for i in 0..n {
            let t = id(i);
            let blockers_done = shape
                .edges
                .iter()
                .filter(|&&(_, b, k)| b == i && k == 0)
                .all(|&(a, _, _)| completed.contains(&id(a)));
            let expected = !completed.contains(&t) && blockers_done;
            prop_assert_eq!(ready.contains(&t), expected, "task {}", t);
        }
    }

    #[test]
    fn prop_back_edges_are_rejected(shape in graph_strategy(10)) {
        let mut g = build(&shape);
        let before = g.dependency_count();

        for &(a, b, _) in &shape.edges {
            prop_assert!(g.add_dependency(&id(b), &id(a), DependencyType::Blocks).is_err());
        }
        prop_assert_eq!(g.dependency_count(), before);
        prop_assert!(g.get_execution_order().is_ok());
    }

    #[test]
    fn prop_assignment_never_exceeds_capacity(
        capacities in proptest::collection::vec(0usize..5, 1..5),
        task_count in 0usize..30,
    ) {
        let mut balancer = AgentAssignment::default();
        for (i, &cap) in capacities.iter().enumerate() {
            balancer.register_agent(AgentInfo::new(&format!("a{i}"), "coder", cap)).unwrap();
        }

        let mut placed = 0;
        for i in 0..task_count {
            let task = TaskDescriptor::new(&format!("t{i}"), "Job");
            if balancer.assign_task(&task, &AssignmentConstraints::default()).is_some() {
                placed += 1;
            }
        }

        let capacity: usize = capacities.iter().sum();
        prop_assert!(placed <= capacity);
        prop_assert!(placed <= task_count);
        for agent in balancer.agents() {
            prop_assert!(agent.current_tasks.len() <= agent.max_concurrent_tasks);
            prop_assert!(agent.workload <= 1.0);
        }
    }

    #[test]
    fn prop_orchestrator_assignment_fits_slots(
        agents in pool_strategy(),
        max_parallel in 0usize..8,
        task_count in 0usize..15,
        started in 0usize..6,
    ) {
        let mut orch = TaskOrchestrator::with_max_parallel(max_parallel);
        orch.build_dependency_graph(
            (0..task_count).map(|i| ParsedTask::new(&id(i), &format!("Job {i}"))).collect(),
        );
        for i in 0..started.min(task_count) {
            orch.start_task(&id(i)).unwrap();
        }
        let running = orch.state().running.len();
        let ready_before: HashSet<String> = orch.ready_tasks().into_iter().collect();

        let made = orch.assign_to_agents(&agents);

        prop_assert!(made.len() <= max_parallel.saturating_sub(running));

        let mut seen = HashSet::new();
        let mut per_agent: HashMap<&str, usize> = HashMap::new();
        for a in &made {
            prop_assert!(seen.insert(a.task_id.clone()), "{} assigned twice", a.task_id);
            prop_assert!(ready_before.contains(&a.task_id));
            prop_assert_eq!(orch.get_task(&a.task_id).unwrap().status, TaskStatus::Assigned);
            *per_agent.entry(a.agent_id.as_str()).or_default() += 1;
        }
        for agent in &agents {
            let count = per_agent.get(agent.id.as_str()).copied().unwrap_or(0);
            prop_assert!(count <= agent.free_slots(), "{} got {}", agent.id, count);
            if !agent.status.is_available() {
                prop_assert_eq!(count, 0);
            }
        }
    }
}
