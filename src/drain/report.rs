//! Outcome aggregation for a run

use chrono::{DateTime, Utc};

use super::task::TaskOutcome;
use crate::error::{Error, Result};

/// Outcome of one node, tagged with its enumeration position
#[derive(Debug)]
pub struct NodeOutcome {
    pub index: usize,
    pub node: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug)]
pub struct DrainReport {
    /// In enumeration order
    pub outcomes: Vec<NodeOutcome>,
    /// Enumeration index of the first failure to complete
    pub first_failure: Option<usize>,
    /// Highest in-flight count seen at admission
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrainReport {
    pub(crate) fn new(
        mut outcomes: Vec<NodeOutcome>,
        first_failure: Option<usize>,
        peak_in_flight: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        outcomes.sort_by_key(|o| o.index);
        Self {
            outcomes,
            first_failure,
            peak_in_flight,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.first_failure.is_none()
    }

    pub fn outcome(&self, node: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.node == node)
            .map(|o| &o.outcome)
    }

    /// Overall result: Ok when every node drained, otherwise the first failure
    /// observed wrapped in [`Error::BatchFailed`].
    pub fn into_result(mut self) -> Result<Self> {
        let Some(index) = self.first_failure else {
            return Ok(self);
        };
        let failed = self.failed();
        let total = self.total();
        let slot = self
            .outcomes
            .iter_mut()
            .find(|o| o.index == index)
            .map(|o| std::mem::replace(&mut o.outcome, TaskOutcome::Succeeded));

        let source = match slot {
            Some(TaskOutcome::Failed(e)) => e,
            _ => Error::ValidationError(format!(
                "failure recorded for node #{} but no failed outcome kept",
                index
            )),
        };
        Err(Error::BatchFailed {
            failed,
            total,
            source: Box::new(source),
        })
    }
}
