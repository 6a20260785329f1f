//! Pod status condition helpers
//!
//! The node controller marks pods on a cordoned node with a
//! `DisruptionTarget` condition. Updates follow the Kubernetes convention:
//! `lastTransitionTime` only moves when the status value flips, and callers
//! learn whether anything changed so they can skip no-op writes.

use chrono::Utc;
use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// Pod condition type signalling an imminent disruption
pub const DISRUPTION_TARGET: &str = "DisruptionTarget";

pub const EVICTION_ATTEMPT_REASON: &str = "EvictionAttempt";
pub const EVICTION_ATTEMPT_MESSAGE: &str = "eviction attempt anticipated by node cordon";

/// Build a pod condition with the current timestamp.
pub fn build_pod_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> PodCondition {
    PodCondition {
        type_: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Time(Utc::now())),
        ..Default::default()
    }
}

/// The condition recorded on pods whose eviction is anticipated.
pub fn eviction_anticipated() -> PodCondition {
    build_pod_condition(
        DISRUPTION_TARGET,
        CONDITION_TRUE,
        EVICTION_ATTEMPT_REASON,
        EVICTION_ATTEMPT_MESSAGE,
    )
}

/// Set or update a condition on a pod status.
///
/// Returns `true` when the stored conditions changed and the status needs to
/// be written back.
pub fn set_pod_condition(status: &mut PodStatus, mut new: PodCondition) -> bool {
    let conditions = status.conditions.get_or_insert_with(Vec::new);

    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return true;
    };

    if existing.status == new.status {
        new.last_transition_time = existing.last_transition_time.clone();
    }

    let unchanged = existing.status == new.status
        && existing.reason == new.reason
        && existing.message == new.message
        && existing.last_probe_time == new.last_probe_time
        && existing.last_transition_time == new.last_transition_time;

    *existing = new;
    !unchanged
}
