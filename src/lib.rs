//! Eviction Autoscaler
//!
//! A Kubernetes controller that anticipates pod evictions caused by node
//! cordons. When a node becomes unschedulable, every pod on it that is
//! protected by a PodDisruptionBudget paired with an `EvictionAutoScaler` is
//! marked with a `DisruptionTarget` condition, and the autoscaler's
//! `spec.lastEviction` is stamped so a scaling component can surge the owning
//! workload before the drain evicts the pod.
//!
//! ## Custom Resources
//!
//! - `EvictionAutoScaler`: pairs 1:1 by name with a PodDisruptionBudget
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: eviction-autoscaler.azure.com/v1
//! kind: EvictionAutoScaler
//! metadata:
//!   name: web            # same name as the PodDisruptionBudget
//!   namespace: prod
//! spec:
//!   targetName: web
//!   targetKind: deployment
//! ```

pub mod conditions;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod index;
pub mod leader_election;
pub mod metrics;
pub mod selector;
pub mod server;
pub mod store;

pub use controllers::{NodeController, NodeControllerConfig, NodeReconciler, Outcome, PolicyOrder};
pub use crd::{Eviction, EvictionAutoScaler, EvictionAutoScalerSpec, EvictionAutoScalerStatus};
pub use error::{OperatorError, Result};
pub use store::{ClusterStore, KubeStore};
