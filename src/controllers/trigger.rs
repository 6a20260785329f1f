//! Cordon trigger filter
//!
//! Nodes emit frequent status updates (heartbeats, conditions, images). The
//! node controller only cares about the `spec.unschedulable` flag, so the
//! watch stream is filtered down to cordon transitions before it reaches the
//! reconciler.

use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, Event};
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};

/// Whether the node is cordoned (marked unschedulable).
pub fn is_cordoned(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

/// Whether a change from `before` to `after` is worth reconciling.
///
/// `before` is `None` for a node seen for the first time, which always passes.
pub fn is_cordon_transition(before: Option<bool>, after: bool) -> bool {
    before != Some(after)
}

/// Remembers the last observed cordon flag per node.
#[derive(Debug, Default)]
pub struct CordonFilter {
    last_seen: HashMap<String, bool>,
    relisted: Option<HashSet<String>>,
}

impl CordonFilter {
    /// Feed one watcher event; returns the node if it should be reconciled.
    pub fn handle(&mut self, event: Event<Node>) -> Option<Node> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                None
            }
            Event::InitApply(node) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(node.name_any());
                }
                self.observe(node)
            }
            Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    self.last_seen.retain(|name, _| relisted.contains(name));
                }
                None
            }
            Event::Apply(node) => self.observe(node),
            Event::Delete(node) => {
                self.last_seen.remove(&node.name_any());
                None
            }
        }
    }

    fn observe(&mut self, node: Node) -> Option<Node> {
        let after = is_cordoned(&node);
        let before = self.last_seen.insert(node.name_any(), after);
        is_cordon_transition(before, after).then_some(node)
    }
}

/// Reduce a node watch stream to the nodes whose cordon flag changed.
pub fn cordon_transitions<S>(events: S) -> impl Stream<Item = watcher::Result<Node>> + Send
where
    S: Stream<Item = watcher::Result<Event<Node>>> + Send,
{
    let mut filter = CordonFilter::default();
    events.filter_map(move |event| {
        let passed = match event {
            Ok(event) => filter.handle(event).map(Ok),
            Err(e) => Some(Err(e)),
        };
        future::ready(passed)
    })
}
