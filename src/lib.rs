//! node-drainer: retire Kubernetes nodes in bounded batches
//!
//! Cordons each node and evicts its pods, keeping at most `batch_size` nodes
//! draining at once so the rest of the cluster can absorb the rescheduled
//! workloads.

pub mod config;
pub mod drain;
pub mod error;
pub mod lifecycle;
pub mod telemetry;

pub use crate::config::DrainConfig;
pub use crate::drain::{BatchOrchestrator, DrainReport, TaskOutcome};
pub use crate::error::{Error, Result};
pub use crate::lifecycle::{DrainOptions, KubeNodeLifecycle, NodeLifecycle, TargetNode};
