//! Integration test suite for taskweave.
//!
//! These tests drive the public API end to end: checklist parsing into a
//! graph, lifecycle tracking, load-balanced assignment and the async
//! coordinator loop.
//!
//! # Test Categories
//!
//! - `checklist_e2e`: Document to graph, schedule and progress
//! - `load_balancing`: Agent scoring, feedback and rebalancing
//! - `coordinator_flow`: Async dispatch and outcome handling
//! - `properties`: Randomized graph invariants

mod fixtures;

mod checklist_e2e;
mod coordinator_flow;
mod load_balancing;
mod properties;
