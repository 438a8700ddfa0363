//! Core graph model for taskweave.
//!
//! This module contains the task vertex types, the dependency DAG and the
//! analyses derived from it.

pub mod analysis;
pub mod dag;
pub mod task;

pub use analysis::{Bottleneck, CriticalPath, GraphStats};
pub use dag::{Cycle, DependencyGraph, GraphEvent, ParallelBatch};
pub use task::{
    DependencyType, GraphEdge, GraphNode, Priority, TaskOptions, TaskStatus,
    DEFAULT_DURATION_MINUTES,
};
