//! Node lifecycle collaborator
//!
//! The orchestrator never touches the cluster directly. Enumeration, cordon
//! and eviction all go through a [`NodeLifecycle`] implementation.

pub mod cluster;
pub mod pods;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::config::DrainConfig;
use crate::error::Result;

pub use self::cluster::KubeNodeLifecycle;

/// A node selected for retirement, captured once at enumeration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetNode {
    pub name: String,
    pub uid: Option<String>,
    /// Whether the node was already cordoned when it was listed
    pub unschedulable: bool,
    pub labels: BTreeMap<String, String>,
}

impl TargetNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            unschedulable: false,
            labels: BTreeMap::new(),
        }
    }
}

impl From<&Node> for TargetNode {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name_any(),
            uid: node.uid(),
            unschedulable: node
                .spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false),
            labels: node.labels().clone(),
        }
    }
}

/// Eviction policy for one drain call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainOptions {
    pub grace_period_seconds: u32,
    /// Skip pods owned by a DaemonSet instead of refusing the drain
    pub ignore_daemon_sets: bool,
    /// Evict pods using emptyDir volumes, losing their local data
    pub delete_emptydir_data: bool,
    /// Evict pods that no controller will recreate
    pub force: bool,
    /// Wait budget for all evictions of the node; `None` waits forever
    pub timeout: Option<Duration>,
}

impl DrainOptions {
    /// Policy every node of a run is drained with. DaemonSet pods are always
    /// ignored and emptyDir data is always deleted.
    pub fn for_run(config: &DrainConfig) -> Self {
        Self {
            grace_period_seconds: config.grace_period_seconds,
            ignore_daemon_sets: true,
            delete_emptydir_data: true,
            force: config.force,
            timeout: config.eviction_timeout(),
        }
    }
}

#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// List the nodes to retire. Fails with `ClusterUnavailable` or `AuthError`.
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<TargetNode>>;

    /// Mark the node unschedulable. Cordoning a cordoned node succeeds.
    async fn cordon(&self, node: &TargetNode) -> Result<()>;

    /// Evict every evictable pod from the node.
    async fn drain(&self, node: &TargetNode, options: &DrainOptions) -> Result<()>;
}
