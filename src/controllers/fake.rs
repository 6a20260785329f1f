//! In-memory [`ClusterStore`] and object builders for controller tests

use crate::crd::{EvictionAutoScaler, EvictionAutoScalerSpec};
use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodSpec, PodStatus};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node(name: &str, cordoned: bool) -> Node {
    Node {
        metadata: meta(None, name),
        spec: Some(NodeSpec {
            unschedulable: Some(cordoned),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(namespace: &str, name: &str, node: &str, labels: &[(&str, &str)]) -> Pod {
    let mut metadata = meta(Some(namespace), name);
    metadata.labels = Some(label_map(labels));
    Pod {
        metadata,
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus::default()),
    }
}

pub fn autoscaler(namespace: &str, name: &str) -> EvictionAutoScaler {
    EvictionAutoScaler {
        metadata: meta(Some(namespace), name),
        spec: EvictionAutoScalerSpec {
            target_name: name.to_string(),
            target_kind: "deployment".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

pub fn budget(namespace: &str, name: &str, match_labels: &[(&str, &str)]) -> PodDisruptionBudget {
    budget_with_selector(
        namespace,
        name,
        Some(LabelSelector {
            match_labels: Some(label_map(match_labels)),
            ..Default::default()
        }),
    )
}

pub fn budget_with_selector(
    namespace: &str,
    name: &str,
    selector: Option<LabelSelector>,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: meta(Some(namespace), name),
        spec: Some(PodDisruptionBudgetSpec {
            selector,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn bump(version: Option<&str>) -> String {
    let current: u64 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

/// Store double that enforces resourceVersion checks on writes
#[derive(Default)]
pub struct FakeStore {
    nodes: Mutex<Vec<Node>>,
    pods: Mutex<Vec<Pod>>,
    autoscalers: Mutex<Vec<EvictionAutoScaler>>,
    budgets: Mutex<Vec<PodDisruptionBudget>>,
    fail_budget_reads: AtomicBool,
    external_autoscaler_update: AtomicBool,
    external_pod_update: AtomicBool,
    pod_status_writes: AtomicUsize,
    autoscaler_writes: AtomicUsize,
}

impl FakeStore {
    pub fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().push(node);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn add_autoscaler(&self, autoscaler: EvictionAutoScaler) {
        self.autoscalers.lock().unwrap().push(autoscaler);
    }

    pub fn add_budget(&self, budget: PodDisruptionBudget) {
        self.budgets.lock().unwrap().push(budget);
    }

    /// Make every budget read fail with a transient API error.
    pub fn fail_budget_reads(&self) {
        self.fail_budget_reads.store(true, Ordering::SeqCst);
    }

    /// Simulate a concurrent writer touching the autoscaler right before our write.
    pub fn race_next_autoscaler_write(&self) {
        self.external_autoscaler_update.store(true, Ordering::SeqCst);
    }

    /// Simulate the kubelet updating the pod right before our status write.
    pub fn race_next_pod_status_write(&self) {
        self.external_pod_update.store(true, Ordering::SeqCst);
    }

    pub fn pod_status_writes(&self) -> usize {
        self.pod_status_writes.load(Ordering::SeqCst)
    }

    pub fn autoscaler_writes(&self) -> usize {
        self.autoscaler_writes.load(Ordering::SeqCst)
    }

    pub fn stored_pod(&self, namespace: &str, name: &str) -> Pod {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .cloned()
            .unwrap()
    }

    pub fn stored_autoscaler(&self, namespace: &str, name: &str) -> EvictionAutoScaler {
        self.autoscalers
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.namespace().as_deref() == Some(namespace) && a.name_any() == name)
            .cloned()
            .unwrap()
    }
}

#[async_trait::async_trait]
impl ClusterStore for FakeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.name_any() == name)
            .cloned()
            .map(Arc::new))
    }

    async fn pods_on_node(&self, node: &str) -> Result<Vec<Arc<Pod>>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| crate::index::node_name_of(p) == Some(node))
            .cloned()
            .map(Arc::new)
            .collect())
    }

    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<Arc<EvictionAutoScaler>>> {
        Ok(self
            .autoscalers
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.namespace().as_deref() == Some(namespace))
            .cloned()
            .map(Arc::new)
            .collect())
    }

    async fn get_budget(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<PodDisruptionBudget>>> {
        if self.fail_budget_reads.load(Ordering::SeqCst) {
            return Err(OperatorError::KubeApi("connection refused".to_string()));
        }
        Ok(self
            .budgets
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.namespace().as_deref() == Some(namespace) && b.name_any() == name)
            .cloned()
            .map(Arc::new))
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<()> {
        let mut pods = self.pods.lock().unwrap();
        let stored = pods
            .iter_mut()
            .find(|p| p.namespace() == pod.namespace() && p.name_any() == pod.name_any())
            .ok_or_else(|| OperatorError::KubeApi("pod not found".to_string()))?;
        if self.external_pod_update.swap(false, Ordering::SeqCst) {
            stored.metadata.resource_version =
                Some(bump(stored.metadata.resource_version.as_deref()));
        }
        if stored.resource_version() != pod.resource_version() {
            return Err(OperatorError::Conflict("pod modified".to_string()));
        }
        stored.status = pod.status.clone();
        stored.metadata.resource_version = Some(bump(pod.metadata.resource_version.as_deref()));
        self.pod_status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_autoscaler(
        &self,
        autoscaler: &EvictionAutoScaler,
    ) -> Result<EvictionAutoScaler> {
        let mut autoscalers = self.autoscalers.lock().unwrap();
        let stored = autoscalers
            .iter_mut()
            .find(|a| {
                a.namespace() == autoscaler.namespace() && a.name_any() == autoscaler.name_any()
            })
            .ok_or_else(|| OperatorError::KubeApi("autoscaler not found".to_string()))?;
        if self.external_autoscaler_update.swap(false, Ordering::SeqCst) {
            stored.metadata.resource_version =
                Some(bump(stored.metadata.resource_version.as_deref()));
        }
        if stored.resource_version() != autoscaler.resource_version() {
            return Err(OperatorError::Conflict(
                "the object has been modified; please apply your changes to the latest version"
                    .to_string(),
            ));
        }
        let mut updated = autoscaler.clone();
        updated.metadata.resource_version =
            Some(bump(autoscaler.metadata.resource_version.as_deref()));
        *stored = updated.clone();
        self.autoscaler_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}
