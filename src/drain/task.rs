//! One node's retirement: cordon, then drain.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use super::gate::GatePermit;
use crate::error::{Error, Result};
use crate::lifecycle::{DrainOptions, NodeLifecycle, TargetNode};

/// Terminal result of one node's drain
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded,
    /// The collaborator's error, unmodified
    Failed(Error),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Failed(e) => Some(e),
        }
    }
}

impl From<Result<()>> for TaskOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => TaskOutcome::Succeeded,
            Err(e) => TaskOutcome::Failed(e),
        }
    }
}

pub struct NodeDrainTask {
    node: TargetNode,
    options: DrainOptions,
    deadline: Option<Duration>,
    lifecycle: Arc<dyn NodeLifecycle>,
}

impl NodeDrainTask {
    pub fn new(
        node: TargetNode,
        options: DrainOptions,
        deadline: Option<Duration>,
        lifecycle: Arc<dyn NodeLifecycle>,
    ) -> Self {
        Self {
            node,
            options,
            deadline,
            lifecycle,
        }
    }

    pub fn node(&self) -> &TargetNode {
        &self.node
    }

    /// Run to completion. The permit is dropped when this returns, whatever
    /// the outcome; no step is retried.
    #[instrument(skip_all, fields(node = %self.node.name))]
    pub async fn run(self, permit: GatePermit) -> TaskOutcome {
        let _permit = permit;
        info!("Draining node {}", self.node.name);

        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.cordon_and_drain())
                .await
                .unwrap_or_else(|_| {
                    Err(Error::TaskTimeout {
                        node: self.node.name.clone(),
                        deadline,
                    })
                }),
            None => self.cordon_and_drain().await,
        };

        match &result {
            Ok(()) => info!("Node {} drained", self.node.name),
            Err(e) => error!("Node {} failed to drain: {}", self.node.name, e),
        }
        result.into()
    }

    async fn cordon_and_drain(&self) -> Result<()> {
        self.lifecycle.cordon(&self.node).await?;
        info!("Node {} cordoned", self.node.name);
        self.lifecycle.drain(&self.node, &self.options).await
    }
}
