//! Bounded-concurrency node draining
//!
//! [`BatchOrchestrator`] launches one [`NodeDrainTask`] per node and uses a
//! [`ConcurrencyGate`] to stop launching while a full batch is in flight.

pub mod gate;
pub mod orchestrator;
pub mod report;
pub mod task;
#[cfg(test)]
mod test_support;

pub use gate::{ConcurrencyGate, GatePermit};
pub use orchestrator::{BatchOrchestrator, RunPhase};
pub use report::{DrainReport, NodeOutcome};
pub use task::{NodeDrainTask, TaskOutcome};
