//! Node Controller
//!
//! Watches Nodes for cordon transitions. For every pod on a cordoned node
//! that is covered by an EvictionAutoScaler (through its paired
//! PodDisruptionBudget), marks the pod with a `DisruptionTarget` condition
//! and records the anticipated eviction on the autoscaler. While pods keep
//! being marked, the node is requeued after a cooldown so the remaining pods
//! are picked up as the autoscaler reacts.

use crate::conditions::{eviction_anticipated, set_pod_condition};
use crate::controllers::policy::{find_policy, PolicyOrder};
use crate::controllers::trigger::{cordon_transitions, is_cordoned};
use crate::controllers::{forget_deleted, ErrorBackoff};
use crate::crd::{Eviction, EvictionAutoScaler};
use crate::error::{OperatorError, Result};
use crate::metrics::Metrics;
use crate::store::{ClusterStore, KubeStore, NodeEvents};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::{Action, Controller};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default delay before a node is reconciled again after marking pods
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Settings for the node reconciler
#[derive(Debug, Clone)]
pub struct NodeControllerConfig {
    /// Requeue delay after a reconcile that marked at least one pod; zero disables the requeue
    pub cooldown: Duration,
    /// Tie-break order between autoscalers matching the same pod
    pub policy_order: PolicyOrder,
}

impl Default for NodeControllerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            policy_order: PolicyOrder::default(),
        }
    }
}

/// What the substrate should do after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the node changes again
    Done,
    /// Reconcile the node again after the given delay
    RequeueAfter(Duration),
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Cordon reconciliation over any [`ClusterStore`]
pub struct NodeReconciler<S> {
    store: S,
    metrics: Metrics,
    config: NodeControllerConfig,
}

impl<S: ClusterStore> NodeReconciler<S> {
    pub fn new(store: S, metrics: Metrics, config: NodeControllerConfig) -> Self {
        Self {
            store,
            metrics,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile a node by name.
    pub async fn reconcile(&self, node_name: &str) -> Result<Outcome> {
        let Some(node) = self.store.get_node(node_name).await? else {
            debug!(node = %node_name, "Node no longer exists");
            return Ok(Outcome::Done);
        };

        if !is_cordoned(&node) {
            return Ok(Outcome::Done);
        }
        self.metrics.inc_node_cordoning();
        info!(node = %node_name, "Node is cordoned");

        let pods = self.store.pods_on_node(node_name).await?;
        if pods.is_empty() {
            return Ok(Outcome::Done);
        }

        // Autoscalers written earlier in this pass; the cache may not have caught up yet.
        let mut written: HashMap<(String, String), EvictionAutoScaler> = HashMap::new();
        let mut pod_changed = false;

        for pod in pods {
            let Some(policy) = find_policy(&self.store, &pod, self.config.policy_order).await?
            else {
                continue;
            };

            let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
            let pod_name = pod.name_any();
            let policy_name = policy.name_any();

            self.metrics.inc_evictions(&namespace);
            info!(
                name = %policy_name,
                namespace = %namespace,
                pod = %pod_name,
                node = %node_name,
                "Found EvictionAutoScaler for pod"
            );

            let mut pod = (*pod).clone();
            let status = pod.status.get_or_insert_with(Default::default);
            if set_pod_condition(status, eviction_anticipated()) {
                self.store.update_pod_status(&pod).await.inspect_err(|e| {
                    error!(
                        namespace = %namespace,
                        pod = %pod_name,
                        "Unable to update pod status: {}", e
                    );
                })?;
            }

            let key = (namespace.clone(), policy_name.clone());
            let mut autoscaler = written
                .remove(&key)
                .unwrap_or_else(|| (*policy).clone());
            autoscaler.spec.last_eviction = Eviction {
                pod_name: pod_name.clone(),
                eviction_time: Some(Time(Utc::now())),
            };
            let stored = self
                .store
                .update_autoscaler(&autoscaler)
                .await
                .inspect_err(|e| {
                    error!(
                        namespace = %namespace,
                        name = %policy_name,
                        "Unable to update EvictionAutoScaler: {}", e
                    );
                })?;
            written.insert(key, stored);
            pod_changed = true;
        }

        if pod_changed && !self.config.cooldown.is_zero() {
            Ok(Outcome::RequeueAfter(self.config.cooldown))
        } else {
            Ok(Outcome::Done)
        }
    }
}

/// Runs the node reconciler under a kube-runtime controller
pub struct NodeController {
    reconciler: NodeReconciler<KubeStore>,
    backoff: Arc<ErrorBackoff>,
}

impl NodeController {
    /// Create a new node controller
    pub fn new(store: KubeStore, metrics: Metrics, config: NodeControllerConfig) -> Self {
        Self {
            reconciler: NodeReconciler::new(store, metrics, config),
            backoff: Arc::new(ErrorBackoff::default()),
        }
    }

    /// Run the node controller, driven by the node watch from [`KubeStore::start`]
    pub async fn run(self: Arc<Self>, node_events: NodeEvents) -> Result<()> {
        info!("Starting Node controller");

        let nodes = self.reconciler.store().nodes();
        let node_events = forget_deleted(node_events, Arc::clone(&self.backoff));
        Controller::for_stream(cordon_transitions(node_events), nodes)
            .shutdown_on_signal()
            .run(
                |node, ctx| async move { ctx.reconcile(node).await },
                |node, error, ctx| ctx.error_policy(&node, error),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        debug!("Reconciled node {}: {:?}", obj.name, action);
                    }
                    Err(e) => {
                        error!("Reconciliation failed: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(&self, node: Arc<Node>) -> std::result::Result<Action, OperatorError> {
        let name = node.name_any();
        let outcome = self.reconciler.reconcile(&name).await?;
        self.backoff.reset(&name);
        Ok(outcome.into())
    }

    fn error_policy(&self, node: &Node, error: &OperatorError) -> Action {
        let name = node.name_any();
        let delay = self.backoff.next_delay(&name, error);
        error!(
            node = %name,
            conflict = error.is_conflict(),
            ?delay,
            "Reconciliation error: {}", error
        );
        Action::requeue(delay)
    }
}
