//! Object access for the node controller
//!
//! [`ClusterStore`] is the read/write surface the reconciler depends on.
//! [`KubeStore`] implements it with reflector caches for reads and the API
//! server for writes. Writes carry the cached `resourceVersion`, so a
//! concurrent external update makes them fail with
//! [`OperatorError::Conflict`](crate::error::OperatorError::Conflict).

use crate::crd::EvictionAutoScaler;
use crate::error::{OperatorError, Result};
use crate::index::PodIndex;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Node watch events, already applied to the node cache
pub type NodeEvents = BoxStream<'static, watcher::Result<Event<Node>>>;

/// Reads and writes performed while reconciling a node
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Current node by name; `None` when it no longer exists.
    async fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>>;

    /// Pods assigned to the node.
    async fn pods_on_node(&self, node: &str) -> Result<Vec<Arc<Pod>>>;

    /// EvictionAutoScalers in a namespace, in store enumeration order.
    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<Arc<EvictionAutoScaler>>>;

    /// The budget paired with an EvictionAutoScaler; `None` when missing.
    async fn get_budget(&self, namespace: &str, name: &str)
        -> Result<Option<Arc<PodDisruptionBudget>>>;

    /// Write the pod's status conditions.
    async fn update_pod_status(&self, pod: &Pod) -> Result<()>;

    /// Replace an EvictionAutoScaler, returning the stored object.
    async fn update_autoscaler(&self, autoscaler: &EvictionAutoScaler)
        -> Result<EvictionAutoScaler>;
}

/// Cache-backed [`ClusterStore`] talking to a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    nodes: Store<Node>,
    pods: PodIndex,
    autoscalers: Store<EvictionAutoScaler>,
    budgets: Store<PodDisruptionBudget>,
}

impl KubeStore {
    /// Start the caches. Pods, budgets and autoscalers are watched in
    /// `namespace` (all namespaces when `None`); nodes are always cluster-wide.
    ///
    /// The returned node events must be polled for the node cache to fill;
    /// the node controller consumes them as its trigger stream.
    pub fn start(client: Client, namespace: Option<&str>) -> (Self, NodeEvents) {
        let (nodes, node_writer) = reflector::store();
        let node_events = reflector::reflector(
            node_writer,
            watcher::watcher(Api::<Node>::all(client.clone()), watcher::Config::default())
                .default_backoff(),
        )
        .boxed();

        let pods = PodIndex::new();
        tokio::spawn(pods.clone().run(scoped_api::<Pod>(&client, namespace)));

        let autoscalers = spawn_reflector(scoped_api::<EvictionAutoScaler>(&client, namespace));
        let budgets = spawn_reflector(scoped_api::<PodDisruptionBudget>(&client, namespace));

        let store = Self {
            client,
            nodes,
            pods,
            autoscalers,
            budgets,
        };
        (store, node_events)
    }

    /// Reader handle of the node cache.
    pub fn nodes(&self) -> Store<Node> {
        self.nodes.clone()
    }

    /// Wait for the pod index, budget and autoscaler caches to complete their initial list.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.pods.wait_until_ready().await;
        self.autoscalers
            .wait_until_ready()
            .await
            .map_err(|e| OperatorError::Configuration(format!("autoscaler cache: {}", e)))?;
        self.budgets
            .wait_until_ready()
            .await
            .map_err(|e| OperatorError::Configuration(format!("budget cache: {}", e)))?;
        info!(pods = self.pods.len(), "Caches synced");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>> {
        Ok(self.nodes.get(&ObjectRef::new(name)))
    }

    async fn pods_on_node(&self, node: &str) -> Result<Vec<Arc<Pod>>> {
        Ok(self.pods.pods_on_node(node))
    }

    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<Arc<EvictionAutoScaler>>> {
        Ok(self
            .autoscalers
            .state()
            .into_iter()
            .filter(|a| a.namespace().as_deref() == Some(namespace))
            .collect())
    }

    async fn get_budget(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<PodDisruptionBudget>>> {
        Ok(self.budgets.get(&ObjectRef::new(name).within(namespace)))
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<()> {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);

        let conditions = pod.status.as_ref().and_then(|s| s.conditions.clone());
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": pod.resource_version() },
            "status": { "conditions": conditions }
        });
        pods.patch_status(&pod.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_autoscaler(
        &self,
        autoscaler: &EvictionAutoScaler,
    ) -> Result<EvictionAutoScaler> {
        let namespace = autoscaler
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<EvictionAutoScaler> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&autoscaler.name_any(), &PostParams::default(), autoscaler)
            .await?)
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Keep a reflector cache for `api` filled in the background.
fn spawn_reflector<K>(api: Api<K>) -> Store<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut events = reflector::reflector(
        writer,
        watcher::watcher(api, watcher::Config::default()).default_backoff(),
    )
    .boxed();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Err(e) = event {
                warn!(kind = %kind, "Watch error: {}", e);
            }
        }
        debug!(kind = %kind, "Watch stream ended");
    });
    reader
}
