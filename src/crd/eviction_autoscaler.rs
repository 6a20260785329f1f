//! EvictionAutoScaler Custom Resource Definition
//!
//! An EvictionAutoScaler pairs 1:1 by name with a PodDisruptionBudget in the
//! same namespace. The node controller records the most recent anticipated
//! eviction in `spec.lastEviction`; a separate scaling component reads it to
//! surge the target workload ahead of the eviction.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// EvictionAutoScaler is the Schema for the evictionautoscalers API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "eviction-autoscaler.azure.com",
    version = "v1",
    kind = "EvictionAutoScaler",
    namespaced,
    status = "EvictionAutoScalerStatus",
    shortname = "eas",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetName"}"#,
    printcolumn = r#"{"name":"Last Evicted","type":"string","jsonPath":".spec.lastEviction.podName"}"#,
    printcolumn = r#"{"name":"Eviction Time","type":"date","jsonPath":".spec.lastEviction.evictionTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EvictionAutoScalerSpec {
    /// Name of the workload scaled in response to evictions
    #[serde(default)]
    pub target_name: String,

    /// Kind of the target workload (deployment or statefulset)
    #[serde(default = "default_target_kind")]
    pub target_kind: String,

    /// The most recent eviction anticipated for a pod covered by the paired budget
    #[serde(default)]
    pub last_eviction: Eviction,
}

/// Record of a single anticipated eviction
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eviction {
    /// Name of the pod expected to be evicted
    #[serde(default)]
    pub pod_name: String,

    /// When the eviction was anticipated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_time: Option<Time>,
}

/// Status of the EvictionAutoScaler, owned by the scaling component
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvictionAutoScalerStatus {
    /// Replica count the target is returned to after a surge
    #[serde(default)]
    pub min_replicas: i32,

    /// Generation of the target observed at the last scaling decision
    #[serde(default)]
    pub target_generation: i64,

    /// Conditions representing the autoscaler state
    #[serde(default)]
    pub conditions: Vec<EvictionAutoScalerCondition>,
}

/// Condition of the EvictionAutoScaler
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvictionAutoScalerCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

fn default_target_kind() -> String {
    "deployment".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_defaults() {
        let spec: EvictionAutoScalerSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.target_kind, "deployment");
        assert!(spec.target_name.is_empty());
        assert_eq!(spec.last_eviction, Eviction::default());
    }

    #[test]
    fn test_last_eviction_wire_names() {
        let spec = EvictionAutoScalerSpec {
            target_name: "web".to_string(),
            target_kind: "deployment".to_string(),
            last_eviction: Eviction {
                pod_name: "web-0".to_string(),
                eviction_time: Some(Time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            },
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["lastEviction"]["podName"], "web-0");
        assert_eq!(value["lastEviction"]["evictionTime"], "2024-01-01T00:00:00Z");
        assert_eq!(value["targetName"], "web");
    }

    #[test]
    fn test_eviction_time_is_whole_seconds_utc() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let eviction = Eviction {
            pod_name: "web-0".to_string(),
            eviction_time: Some(Time(at)),
        };
        let value = serde_json::to_value(&eviction).unwrap();
        assert_eq!(value["evictionTime"], "2024-05-06T07:08:09Z");
    }

    #[test]
    fn test_eviction_time_schema_is_date_time() {
        let crd = serde_json::to_value(EvictionAutoScaler::crd()).unwrap();
        let field = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
            ["properties"]["lastEviction"]["properties"]["evictionTime"];
        assert_eq!(field["format"], "date-time");
    }

    #[test]
    fn test_crd_identity() {
        let crd = EvictionAutoScaler::crd();
        assert_eq!(crd.spec.group, "eviction-autoscaler.azure.com");
        assert_eq!(crd.spec.names.kind, "EvictionAutoScaler");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
