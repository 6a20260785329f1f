//! Controllers for the eviction autoscaler
//!
//! The node controller watches Nodes and reacts to cordon transitions by
//! recording anticipated evictions on the EvictionAutoScalers that govern the
//! affected pods.

mod node;
mod policy;
mod trigger;

#[cfg(test)]
pub(crate) mod fake;

pub use node::{
    NodeController, NodeControllerConfig, NodeReconciler, Outcome, DEFAULT_COOLDOWN,
};
pub use policy::{find_policy, PolicyOrder};
pub use trigger::{cordon_transitions, is_cordon_transition, is_cordoned, CordonFilter};

use crate::error::OperatorError;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, Event};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONFLICT_RETRY: Duration = Duration::from_secs(1);
const BASE_RETRY: Duration = Duration::from_secs(5);
const MAX_RETRY: Duration = Duration::from_secs(300);

/// Per-object retry delays for failed reconciles
///
/// Write conflicts are retried quickly since a fresh read usually resolves
/// them. Other failures back off exponentially until the object reconciles
/// successfully again.
#[derive(Debug, Default)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<String, u32>>,
}

impl ErrorBackoff {
    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &str, error: &OperatorError) -> Duration {
        if error.is_conflict() {
            return CONFLICT_RETRY;
        }
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = BASE_RETRY
            .saturating_mul(2u32.saturating_pow(*count))
            .min(MAX_RETRY);
        *count = count.saturating_add(1);
        delay
    }

    /// Forget the failure history of `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Drop the retry history of nodes as they are deleted.
///
/// A deleted node is never reconciled again, so a successful reconcile would
/// never clear its entry.
pub fn forget_deleted<S>(
    events: S,
    backoff: Arc<ErrorBackoff>,
) -> impl Stream<Item = watcher::Result<Event<Node>>> + Send
where
    S: Stream<Item = watcher::Result<Event<Node>>> + Send,
{
    events.inspect(move |event| {
        if let Ok(Event::Delete(node)) = event {
            backoff.reset(&node.name_any());
        }
    })
}
