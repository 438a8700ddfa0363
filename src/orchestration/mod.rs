//! Checklist-driven orchestration on top of the dependency graph.
//!
//! [`TaskOrchestrator`] turns a markdown checklist into a graph and tracks
//! each task's lifecycle. [`AgentAssignment`] decides which worker runs
//! what. [`Coordinator`] drives both asynchronously from worker outcomes.

pub mod agent;
pub mod assignment;
pub mod coordinator;
pub mod keywords;
pub mod orchestrator;
pub mod parser;

pub use agent::{AgentInfo, AgentStatus, AgentUpdate, TaskAssignment, TaskDescriptor};
pub use assignment::{
    AgentAssignment, AssignmentConstraints, AssignmentEvent, LoadStats, RebalanceReport,
    ScoreBreakdown, TaskMove,
};
pub use coordinator::{Coordinator, CoordinatorEvent, RunSummary, TaskOutcome};
pub use orchestrator::{
    BuildReport, Diagnostic, DiagnosticKind, OrchestratorEvent, OrchestratorSnapshot,
    OrchestratorState, Progress, ScheduleOptimization, TaskOrchestrator,
};
pub use parser::{parse_checklist, slugify, ParsedTask};
