//! EvictionAutoScaler selection for a pod
//!
//! Each EvictionAutoScaler is paired by name with a PodDisruptionBudget in
//! the same namespace. A pod is governed by the first autoscaler whose budget
//! selector matches the pod's labels.

use crate::crd::EvictionAutoScaler;
use crate::error::Result;
use crate::selector::Selector;
use crate::store::ClusterStore;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Order in which candidate autoscalers are tried when several could match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyOrder {
    /// Whatever order the cache enumerates them in (unspecified)
    #[default]
    Listing,
    /// Lexicographic by autoscaler name
    Name,
}

impl FromStr for PolicyOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "listing" => Ok(PolicyOrder::Listing),
            "name" => Ok(PolicyOrder::Name),
            other => Err(format!(
                "unknown policy order {:?}, expected \"listing\" or \"name\"",
                other
            )),
        }
    }
}

impl fmt::Display for PolicyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyOrder::Listing => write!(f, "listing"),
            PolicyOrder::Name => write!(f, "name"),
        }
    }
}

/// Find the EvictionAutoScaler governing `pod`, if any.
///
/// Candidates with a missing budget or an unparseable selector are skipped.
/// Any other store error aborts the lookup.
pub async fn find_policy<S>(
    store: &S,
    pod: &Pod,
    order: PolicyOrder,
) -> Result<Option<Arc<EvictionAutoScaler>>>
where
    S: ClusterStore + ?Sized,
{
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
    let mut candidates = store.list_autoscalers(&namespace).await?;
    if order == PolicyOrder::Name {
        candidates.sort_by_key(|a| a.name_any());
    }

    let labels = pod.labels();
    for candidate in candidates {
        let name = candidate.name_any();
        let Some(budget) = store.get_budget(&namespace, &name).await? else {
            warn!(namespace = %namespace, name = %name, "No matching PodDisruptionBudget");
            continue;
        };

        let raw = budget.spec.as_ref().and_then(|s| s.selector.as_ref());
        let selector = match Selector::parse(raw) {
            Ok(selector) => selector,
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    pdb = %name,
                    "Invalid PodDisruptionBudget selector: {}", e
                );
                continue;
            }
        };

        if selector.matches(labels) {
            return Ok(Some(candidate));
        }
    }

    debug!(namespace = %namespace, pod = %pod.name_any(), "No EvictionAutoScaler governs pod");
    Ok(None)
}
