//! Pod-by-node secondary index
//!
//! Maintains a `spec.nodeName -> pods` lookup from a Pod watch stream so
//! reconciles can enumerate the pods on a node without scanning every pod in
//! the cluster. Pods without a node assignment are never indexed. A relist
//! (watcher `Init` .. `InitDone`) is staged in a buffer and swapped in
//! atomically so readers never observe a half-built index.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

type PodKey = (String, String);

/// Index key for a pod: its node assignment, if any.
pub fn node_name_of(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

fn pod_key(pod: &Pod) -> PodKey {
    (pod.namespace().unwrap_or_default(), pod.name_any())
}

#[derive(Default)]
struct IndexState {
    by_node: HashMap<String, BTreeMap<PodKey, Arc<Pod>>>,
    node_of: HashMap<PodKey, String>,
}

impl IndexState {
    fn upsert(&mut self, pod: Pod) {
        let key = pod_key(&pod);
        self.remove_key(&key);
        let Some(node) = node_name_of(&pod).map(str::to_string) else {
            return;
        };
        self.node_of.insert(key.clone(), node.clone());
        self.by_node.entry(node).or_default().insert(key, Arc::new(pod));
    }

    fn remove_key(&mut self, key: &PodKey) {
        let Some(node) = self.node_of.remove(key) else {
            return;
        };
        if let Some(pods) = self.by_node.get_mut(&node) {
            pods.remove(key);
            if pods.is_empty() {
                self.by_node.remove(&node);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    live: RwLock<IndexState>,
    staged: RwLock<Option<IndexState>>,
    ready: AtomicBool,
    ready_notify: Notify,
}

/// Cloneable handle to the pod-by-node index
#[derive(Clone, Default)]
pub struct PodIndex {
    shared: Arc<Shared>,
}

impl PodIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pods currently assigned to `node`, ordered by namespace and name.
    pub fn pods_on_node(&self, node: &str) -> Vec<Arc<Pod>> {
        let live = self.shared.live.read().unwrap_or_else(|e| e.into_inner());
        live.by_node
            .get(node)
            .map(|pods| pods.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed pods across all nodes.
    pub fn len(&self) -> usize {
        let live = self.shared.live.read().unwrap_or_else(|e| e.into_inner());
        live.node_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the initial list has been fully indexed.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Wait for the initial list to be fully indexed.
    pub async fn wait_until_ready(&self) {
        loop {
            let notified = self.shared.ready_notify.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }

    /// Apply one watcher event.
    pub fn apply(&self, event: Event<Pod>) {
        match event {
            Event::Init => {
                let mut staged = self.shared.staged.write().unwrap_or_else(|e| e.into_inner());
                *staged = Some(IndexState::default());
            }
            Event::InitApply(pod) => {
                let mut staged = self.shared.staged.write().unwrap_or_else(|e| e.into_inner());
                staged.get_or_insert_with(IndexState::default).upsert(pod);
            }
            Event::InitDone => {
                let rebuilt = self
                    .shared
                    .staged
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .take()
                    .unwrap_or_default();
                let count = rebuilt.node_of.len();
                *self.shared.live.write().unwrap_or_else(|e| e.into_inner()) = rebuilt;
                if !self.shared.ready.swap(true, Ordering::AcqRel) {
                    info!(pods = count, "Pod-by-node index built");
                }
                self.shared.ready_notify.notify_waiters();
            }
            Event::Apply(pod) => {
                let mut live = self.shared.live.write().unwrap_or_else(|e| e.into_inner());
                live.upsert(pod);
            }
            Event::Delete(pod) => {
                let mut live = self.shared.live.write().unwrap_or_else(|e| e.into_inner());
                live.remove_key(&pod_key(&pod));
            }
        }
    }

    /// Drive the index from a Pod watch until the stream ends.
    pub async fn run(self, pods: Api<Pod>) {
        let mut events = watcher::watcher(pods, watcher::Config::default())
            .default_backoff()
            .boxed();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.apply(event),
                Err(e) => warn!("Pod watch error: {}", e),
            }
        }
        debug!("Pod watch stream ended");
    }
}
