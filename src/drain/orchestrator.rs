//! Batch orchestration of node drains
//!
//! Nodes are listed once, then admitted in listing order. After every launch
//! the in-flight count is checked; once it reaches the batch size the
//! orchestrator waits for the whole batch to finish before launching again.
//! This check-then-wait policy bounds concurrency at every launch boundary but
//! is not a strict semaphore.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::gate::ConcurrencyGate;
use super::report::{DrainReport, NodeOutcome};
use super::task::{NodeDrainTask, TaskOutcome};
use crate::config::DrainConfig;
use crate::error::{Error, Result};
use crate::lifecycle::{DrainOptions, NodeLifecycle, TargetNode};

/// Lifecycle of one run. `AllSucceeded`, `AnyFailed` and `EnumerationFailed`
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Enumerating,
    Draining,
    AllSucceeded,
    AnyFailed,
    EnumerationFailed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::AllSucceeded | RunPhase::AnyFailed | RunPhase::EnumerationFailed
        )
    }
}

pub struct BatchOrchestrator {
    config: DrainConfig,
    lifecycle: Arc<dyn NodeLifecycle>,
    gate: Arc<ConcurrencyGate>,
    phase: watch::Sender<RunPhase>,
}

impl BatchOrchestrator {
    pub fn new(config: DrainConfig, lifecycle: Arc<dyn NodeLifecycle>) -> Result<Self> {
        config.validate()?;
        let (phase, _) = watch::channel(RunPhase::Idle);
        Ok(Self {
            config,
            lifecycle,
            gate: ConcurrencyGate::new(),
            phase,
        })
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Follow phase transitions while a run is in progress
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// List the nodes a run would drain, without touching them
    pub async fn plan(&self) -> Result<Vec<TargetNode>> {
        self.lifecycle
            .list_nodes(self.config.node_selector.as_deref())
            .await
    }

    /// Move `Idle` to `Enumerating` in one step, so only one `run` can start.
    fn claim(&self) -> Result<()> {
        let mut seen = RunPhase::Idle;
        let claimed = self.phase.send_if_modified(|phase| {
            seen = *phase;
            if *phase == RunPhase::Idle {
                *phase = RunPhase::Enumerating;
                true
            } else {
                false
            }
        });
        if claimed {
            Ok(())
        } else {
            Err(Error::ValidationError(format!(
                "orchestrator already used (phase {:?})",
                seen
            )))
        }
    }

    /// Drain every listed node. Fails only if listing fails; per-node failures
    /// are in the report (see [`DrainReport::into_result`]).
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn run(&self) -> Result<DrainReport> {
        self.claim()?;
        let started_at = Utc::now();

        let nodes = match self.plan().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Failed to list nodes: {}", e);
                self.phase.send_replace(RunPhase::EnumerationFailed);
                return Err(e);
            }
        };
        info!("Found {} nodes to drain", nodes.len());

        self.phase.send_replace(RunPhase::Draining);
        let options = DrainOptions::for_run(&self.config);
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let mut names = Vec::with_capacity(nodes.len());
        let mut collector = Collector::default();

        for (index, node) in nodes.into_iter().enumerate() {
            names.push(node.name.clone());
            let permit = self.gate.admit();
            let task = NodeDrainTask::new(
                node,
                options.clone(),
                self.config.task_timeout(),
                Arc::clone(&self.lifecycle),
            );
            tasks.spawn(async move {
                let node = task.node().name.clone();
                let outcome = AssertUnwindSafe(task.run(permit))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        TaskOutcome::Failed(Error::TaskAborted {
                            node: node.clone(),
                            reason: panic_message(panic.as_ref()),
                        })
                    });
                NodeOutcome {
                    index,
                    node,
                    outcome,
                }
            });

            if self.gate.count() >= self.config.batch_size {
                self.gate.join().await;
                collector.collect_finished(&mut tasks).await;
            }
        }

        self.gate.join().await;
        collector.collect_finished(&mut tasks).await;
        collector.account_for_lost(&names);

        let report = DrainReport::new(
            collector.outcomes,
            collector.first_failure,
            self.gate.peak(),
            started_at,
        );
        if report.is_success() {
            self.phase.send_replace(RunPhase::AllSucceeded);
            info!("All {} nodes drained", report.total());
        } else {
            self.phase.send_replace(RunPhase::AnyFailed);
            warn!(
                "{} of {} nodes failed to drain",
                report.failed(),
                report.total()
            );
        }
        Ok(report)
    }
}

#[derive(Default)]
struct Collector {
    outcomes: Vec<NodeOutcome>,
    first_failure: Option<usize>,
    lost: Vec<String>,
}

impl Collector {
    /// Reap every task in the set, in completion order. Called once the gate
    /// is idle, so every remaining task is past its release.
    async fn collect_finished(&mut self, tasks: &mut JoinSet<NodeOutcome>) {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => self.record(outcome),
                Err(e) => {
                    error!("Drain task did not complete: {}", e);
                    self.lost.push(e.to_string());
                }
            }
        }
    }

    /// Tasks cancelled by the runtime never report. Give every launched node
    /// without an outcome a `TaskAborted` failure.
    fn account_for_lost(&mut self, names: &[String]) {
        if self.lost.is_empty() {
            return;
        }
        let reason = self.lost.join("; ");
        for (index, node) in names.iter().enumerate() {
            if self.outcomes.iter().any(|o| o.index == index) {
                continue;
            }
            self.record(NodeOutcome {
                index,
                node: node.clone(),
                outcome: TaskOutcome::Failed(Error::TaskAborted {
                    node: node.clone(),
                    reason: reason.clone(),
                }),
            });
        }
    }

    fn record(&mut self, outcome: NodeOutcome) {
        if !outcome.outcome.is_success() && self.first_failure.is_none() {
            self.first_failure = Some(outcome.index);
        }
        self.outcomes.push(outcome);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", msg)
    } else {
        "task panicked".to_string()
    }
}
