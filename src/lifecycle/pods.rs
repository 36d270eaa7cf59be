//! Pod selection for a node drain
//!
//! Decides, pod by pod, whether a drain evicts it, leaves it alone, or must
//! refuse to proceed. Follows `kubectl drain`:
//! * static mirror pods cannot be evicted and are skipped;
//! * DaemonSet pods are skipped when DaemonSets are ignored, refused otherwise;
//! * any other completed pod is removed, whatever its owner or volumes;
//! * pods with emptyDir volumes are refused unless their data may be deleted;
//! * pods without a controller are refused unless the drain is forced.
//!
//! Mirror and DaemonSet pods are left alone whatever their phase.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::info;

use super::DrainOptions;
use crate::error::{Error, Result};

pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodDisposition {
    Evict,
    Skip(&'static str),
    Refuse(&'static str),
}

pub fn disposition(pod: &Pod, options: &DrainOptions) -> PodDisposition {
    if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
        return PodDisposition::Skip("is a static mirror pod");
    }

    let controller = controller_kind(pod);
    match controller {
        Some("DaemonSet") if options.ignore_daemon_sets => {
            return PodDisposition::Skip("is managed by a DaemonSet")
        }
        Some("DaemonSet") => return PodDisposition::Refuse("is managed by a DaemonSet"),
        _ => {}
    }

    if is_finished(pod) {
        return PodDisposition::Evict;
    }

    if controller.is_none() && !options.force {
        return PodDisposition::Refuse("is not managed by a controller");
    }

    if uses_empty_dir(pod) && !options.delete_emptydir_data {
        return PodDisposition::Refuse("uses emptyDir local storage");
    }

    PodDisposition::Evict
}

/// Pick the pods to evict from a node, or the first reason the drain must stop
pub fn select_pods(
    node_name: &str,
    pods: impl IntoIterator<Item = Pod>,
    options: &DrainOptions,
) -> Result<Vec<Pod>> {
    let mut selected = Vec::new();
    for pod in pods {
        match disposition(&pod, options) {
            PodDisposition::Evict => selected.push(pod),
            PodDisposition::Skip(reason) => {
                info!("Not draining pod {}: pod {}", pod.name_any(), reason);
            }
            PodDisposition::Refuse(reason) => {
                return Err(Error::DrainRefused {
                    node: node_name.to_string(),
                    pod: format!(
                        "{}/{}",
                        pod.namespace().unwrap_or_default(),
                        pod.name_any()
                    ),
                    reason: reason.to_string(),
                });
            }
        }
    }
    Ok(selected)
}

fn is_finished(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

fn controller_kind(pod: &Pod) -> Option<&str> {
    pod.owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| r.kind.as_str())
}

fn uses_empty_dir(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()))
        .unwrap_or(false)
}
