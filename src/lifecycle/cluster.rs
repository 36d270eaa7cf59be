//! Kubernetes implementation of the node lifecycle
//!
//! Cordons through `Api::<Node>::cordon` and drains through the Eviction API,
//! so PodDisruptionBudgets are respected. Mirrors `kubectl drain`.

use async_trait::async_trait;
use futures::{stream, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, DeleteParams, EvictParams, ListParams},
    Client, ResourceExt,
};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::pods::select_pods;
use super::{DrainOptions, NodeLifecycle, TargetNode};
use crate::error::{Error, Result};

// Pods evicted at the same time on one node, deletion wait included.
const CONCURRENT_EVICTIONS: usize = 5;

// `kubectl drain` waits 5 seconds between attempts while a PodDisruptionBudget
// holds an eviction back.
const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub struct KubeNodeLifecycle {
    client: Client,
    eviction_retry_interval: Duration,
    deletion_check_interval: Duration,
}

impl KubeNodeLifecycle {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            eviction_retry_interval: EVICTION_RETRY_INTERVAL,
            deletion_check_interval: DELETION_CHECK_INTERVAL,
        }
    }

    /// Override the pause between blocked evictions and between deletion checks
    pub fn with_intervals(mut self, eviction_retry: Duration, deletion_check: Duration) -> Self {
        self.eviction_retry_interval = eviction_retry;
        self.deletion_check_interval = deletion_check;
        self
    }

    #[instrument(skip(self, pod, options), fields(pod = %pod.name_any()), err)]
    async fn evict_pod(
        &self,
        node: &str,
        pod: &Pod,
        options: &DrainOptions,
        started: Instant,
    ) -> Result<()> {
        let api = namespaced_pod_api(&self.client, pod);
        let name = pod.name_any();
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(options.grace_period_seconds),
                ..Default::default()
            }),
            ..Default::default()
        };

        loop {
            match api.evict(&name, &params).await {
                Ok(_) => {
                    info!("Evicted pod {}", name);
                    break;
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!("Pod {} already gone", name);
                    return Ok(());
                }
                // 429: a PodDisruptionBudget does not allow the eviction yet.
                // 500: usually several budgets match the same pod.
                Err(kube::Error::Api(e)) if e.code == 429 || e.code == 500 => {
                    if deadline_passed(started, options.timeout) {
                        return Err(Error::EvictionBlocked {
                            node: node.to_string(),
                            pod: name,
                            reason: e.message,
                        });
                    }
                    warn!(
                        "Eviction of pod {} not allowed yet: {}. Retrying in {}s",
                        name,
                        e.message,
                        self.eviction_retry_interval.as_secs_f64()
                    );
                    sleep(self.eviction_retry_interval).await;
                }
                Err(source) => {
                    return Err(Error::PodDeletionError {
                        node: node.to_string(),
                        pod: name,
                        source,
                    });
                }
            }
        }

        self.wait_for_deletion(node, pod, options, started).await
    }

    async fn wait_for_deletion(
        &self,
        node: &str,
        pod: &Pod,
        options: &DrainOptions,
        started: Instant,
    ) -> Result<()> {
        let api = namespaced_pod_api(&self.client, pod);
        let name = pod.name_any();

        loop {
            match api.get(&name).await {
                Err(kube::Error::Api(e)) if e.code == 404 => break,
                // Same name, new UID: the evicted pod is gone.
                Ok(current) if current.uid() != pod.uid() => break,
                Ok(_) => debug!("Pod {} not yet deleted", name),
                Err(e) => warn!("Could not check whether pod {} is deleted: {}", name, e),
            }

            if deadline_passed(started, options.timeout) {
                return Err(Error::EvictionTimeout {
                    node: node.to_string(),
                    pod: name,
                    waited: started.elapsed(),
                });
            }
            sleep(self.deletion_check_interval).await;
        }

        info!("Pod {} deleted", name);
        Ok(())
    }
}

#[async_trait]
impl NodeLifecycle for KubeNodeLifecycle {
    #[instrument(skip(self), err)]
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<TargetNode>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };

        let list = nodes.list(&params).await.map_err(classify_list_error)?;
        Ok(list.items.iter().map(TargetNode::from).collect())
    }

    #[instrument(skip(self, node), fields(node = %node.name), err)]
    async fn cordon(&self, node: &TargetNode) -> Result<()> {
        if node.unschedulable {
            debug!("Node {} was already unschedulable when listed", node.name);
        }
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .cordon(&node.name)
            .await
            .map_err(|source| Error::CordonError {
                node: node.name.clone(),
                source,
            })?;
        Ok(())
    }

    #[instrument(skip(self, node), fields(node = %node.name), err)]
    async fn drain(&self, node: &TargetNode, options: &DrainOptions) -> Result<()> {
        let started = Instant::now();
        let pods: Api<Pod> = Api::all(self.client.clone());
        let on_node = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node.name)))
            .await?;

        let targets = select_pods(&node.name, on_node.items, options)?;
        info!("Evicting {} pods from node {}", targets.len(), node.name);

        stream::iter(targets.into_iter().map(Ok::<Pod, Error>))
            .try_for_each_concurrent(CONCURRENT_EVICTIONS, |pod| async move {
                self.evict_pod(&node.name, &pod, options, started).await
            })
            .await
    }
}

/// 401 and 403 mean the credentials are wrong; anything else means the
/// cluster could not answer.
pub fn classify_list_error(err: kube::Error) -> Error {
    let unauthorized =
        matches!(&err, kube::Error::Api(resp) if resp.code == 401 || resp.code == 403);
    if unauthorized {
        Error::AuthError(err)
    } else {
        Error::ClusterUnavailable(err)
    }
}

fn deadline_passed(started: Instant, timeout: Option<Duration>) -> bool {
    timeout.is_some_and(|t| started.elapsed() >= t)
}

fn namespaced_pod_api(client: &Client, pod: &Pod) -> Api<Pod> {
    match pod.namespace() {
        Some(ns) => Api::namespaced(client.clone(), &ns),
        None => Api::default_namespaced(client.clone()),
    }
}
