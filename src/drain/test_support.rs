//! Scripted in-memory lifecycle for orchestrator and task tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::lifecycle::{DrainOptions, NodeLifecycle, TargetNode};

#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    Cordon,
    EvictionTimeout,
    Panic,
    Hang,
}

#[derive(Default)]
pub(crate) struct FakeLifecycle {
    nodes: Vec<TargetNode>,
    unavailable: bool,
    faults: HashMap<String, Fault>,
    delays: HashMap<String, Duration>,
    pub cordoned: Mutex<HashSet<String>>,
    pub drained: Mutex<Vec<String>>,
    pub drain_options: Mutex<Vec<DrainOptions>>,
    pub selectors: Mutex<Vec<Option<String>>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl FakeLifecycle {
    pub fn with_nodes(names: &[&str]) -> Self {
        Self {
            nodes: names.iter().map(|n| TargetNode::new(*n)).collect(),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn fault(mut self, node: &str, fault: Fault) -> Self {
        self.faults.insert(node.to_string(), fault);
        self
    }

    pub fn delay(mut self, node: &str, delay: Duration) -> Self {
        self.delays.insert(node.to_string(), delay);
        self
    }

    pub fn drained(&self) -> Vec<String> {
        self.drained.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeLifecycle for FakeLifecycle {
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<TargetNode>> {
        self.selectors
            .lock()
            .unwrap()
            .push(selector.map(str::to_string));
        if self.unavailable {
            return Err(Error::ClusterUnavailable(kube::Error::Api(
                kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "connection refused".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                },
            )));
        }
        Ok(self.nodes.clone())
    }

    async fn cordon(&self, node: &TargetNode) -> Result<()> {
        if let Some(Fault::Cordon) = self.faults.get(&node.name) {
            return Err(Error::CordonError {
                node: node.name.clone(),
                source: kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "nodes is forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }),
            });
        }
        // Cordoning twice is fine.
        self.cordoned.lock().unwrap().insert(node.name.clone());
        Ok(())
    }

    async fn drain(&self, node: &TargetNode, options: &DrainOptions) -> Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.drain_options.lock().unwrap().push(options.clone());

        let delay = self
            .delays
            .get(&node.name)
            .copied()
            .unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;

        let result = match self.faults.get(&node.name) {
            Some(Fault::EvictionTimeout) => Err(Error::EvictionTimeout {
                node: node.name.clone(),
                pod: "web-0".to_string(),
                waited: Duration::from_secs(60),
            }),
            Some(Fault::Panic) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("eviction client crashed");
            }
            Some(Fault::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.drained.lock().unwrap().push(node.name.clone());
        }
        result
    }
}
