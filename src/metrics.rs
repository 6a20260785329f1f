//! Prometheus metrics for the node controller
//!
//! Counters live in a crate-owned [`Registry`] so that tests and multiple
//! controller instances do not collide in the process-global default registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Handle to the controller's metrics. Clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    node_cordoning: IntCounter,
    evictions: IntCounterVec,
}

impl Metrics {
    /// Create and register all counters.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let node_cordoning = IntCounter::with_opts(Opts::new(
            "eviction_autoscaler_node_cordoning_total",
            "Number of reconciles that observed a cordoned node",
        ))?;
        let evictions = IntCounterVec::new(
            Opts::new(
                "eviction_autoscaler_evictions_total",
                "Number of anticipated pod evictions recorded against an EvictionAutoScaler",
            ),
            &["namespace"],
        )?;

        registry.register(Box::new(node_cordoning.clone()))?;
        registry.register(Box::new(evictions.clone()))?;

        Ok(Self {
            registry,
            node_cordoning,
            evictions,
        })
    }

    pub fn inc_node_cordoning(&self) {
        self.node_cordoning.inc();
    }

    pub fn inc_evictions(&self, namespace: &str) {
        self.evictions.with_label_values(&[namespace]).inc();
    }

    pub fn node_cordoning_count(&self) -> u64 {
        self.node_cordoning.get()
    }

    pub fn eviction_count(&self, namespace: &str) -> u64 {
        self.evictions.with_label_values(&[namespace]).get()
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
