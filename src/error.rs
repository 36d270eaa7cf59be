//! Error types for node-drainer
//!
//! Enumeration errors are fatal for a run. Per-node errors are captured at the
//! task boundary and reported in that node's outcome.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error outside of a classified drain step
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The cluster API could not be reached while listing nodes
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(#[source] kube::Error),

    /// The credentials in use are not allowed to list nodes
    #[error("Not authorized to access the cluster: {0}")]
    AuthError(#[source] kube::Error),

    /// Marking the node unschedulable failed
    #[error("Failed to cordon node '{node}': {source}")]
    CordonError {
        node: String,
        #[source]
        source: kube::Error,
    },

    /// An eviction was never admitted (typically held back by a PodDisruptionBudget)
    #[error("Eviction of pod '{pod}' on node '{node}' blocked: {reason}")]
    EvictionBlocked {
        node: String,
        pod: String,
        reason: String,
    },

    /// An evicted pod was not deleted in the time allowed
    #[error("Pod '{pod}' on node '{node}' was not deleted within {:.0}s", .waited.as_secs_f64())]
    EvictionTimeout {
        node: String,
        pod: String,
        waited: Duration,
    },

    /// The API rejected the eviction or deletion of a pod
    #[error("Failed to remove pod '{pod}' from node '{node}': {source}")]
    PodDeletionError {
        node: String,
        pod: String,
        #[source]
        source: kube::Error,
    },

    /// The drain policy forbids evicting a pod found on the node
    #[error("Refusing to drain node '{node}': pod '{pod}' {reason}")]
    DrainRefused {
        node: String,
        pod: String,
        reason: String,
    },

    /// The per-task deadline expired before cordon and drain completed
    #[error("Drain of node '{node}' exceeded its deadline of {}s", .deadline.as_secs())]
    TaskTimeout { node: String, deadline: Duration },

    /// The drain task panicked or was cancelled by the runtime
    #[error("Drain task for node '{node}' aborted: {reason}")]
    TaskAborted { node: String, reason: String },

    /// At least one node failed to drain; carries the first failure observed
    #[error("{failed} of {total} nodes failed to drain; first failure: {source}")]
    BatchFailed {
        failed: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl Error {
    /// Name of the node this error belongs to, if it is a per-node error
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::CordonError { node, .. }
            | Error::EvictionBlocked { node, .. }
            | Error::EvictionTimeout { node, .. }
            | Error::PodDeletionError { node, .. }
            | Error::DrainRefused { node, .. }
            | Error::TaskTimeout { node, .. }
            | Error::TaskAborted { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Whether this error ends the run before any node is processed
    pub fn is_enumeration_error(&self) -> bool {
        matches!(self, Error::ClusterUnavailable(_) | Error::AuthError(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
