//! Lease-based leader election.
//!
//! Several controller replicas may run at once; only the holder of the
//! `coordination.k8s.io/v1` Lease starts the node controller. Standby
//! replicas block in [`LeaderElector::acquire`] until the holder stops
//! renewing and the lease expires.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "eviction-autoscaler-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace for the lease.
///
/// Uses the explicit flag, then the pod's service account namespace, then `default`.
pub fn detect_namespace(explicit: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

/// Whether the lease has gone unrenewed for longer than its duration at `now`.
fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let duration_secs = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS) as i64;
    match spec.and_then(|s| s.renew_time.as_ref()) {
        Some(MicroTime(renewed)) => {
            now.signed_duration_since(*renewed).num_seconds() > duration_secs
        }
        None => true,
    }
}

fn holder(lease: &Lease) -> Option<&str> {
    lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
}

/// Lease spec claiming the lease for `identity`, carrying over history from `prev`.
fn claim(prev: Option<&LeaseSpec>, identity: &str, now: &MicroTime, takeover: bool) -> LeaseSpec {
    let transitions = prev.and_then(|s| s.lease_transitions).unwrap_or(0);
    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(LEASE_DURATION_SECS),
        acquire_time: if takeover || prev.is_none() {
            Some(now.clone())
        } else {
            prev.and_then(|s| s.acquire_time.clone())
        },
        renew_time: Some(now.clone()),
        lease_transitions: Some(if takeover { transitions + 1 } else { transitions }),
        ..Default::default()
    }
}

/// Holds (or waits for) the controller's leader lease.
pub struct LeaderElector {
    lease_api: Api<Lease>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str) -> Self {
        let lease_api = Api::<Lease>::namespaced(client, namespace);
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("eviction-autoscaler-{:08x}", rand::random::<u32>()));
        info!(identity = %identity, namespace = %namespace, "Initialized leader elector");
        Self {
            lease_api,
            identity,
        }
    }

    /// Blocks until the lease is acquired.
    pub async fn acquire(&self) -> anyhow::Result<()> {
        info!(identity = %self.identity, lease = LEASE_NAME, "Waiting to acquire leader lease");
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => {
                    debug!("Lease held by another instance, retrying in {:?}", RETRY_INTERVAL)
                }
                Err(e) => warn!("Lease acquisition error: {}, retrying in {:?}", e, RETRY_INTERVAL),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renews the lease. `Ok(false)` means leadership was lost.
    pub async fn renew(&self) -> anyhow::Result<bool> {
        let lease = self.lease_api.get(LEASE_NAME).await?;
        if holder(&lease) != Some(self.identity.as_str()) {
            return Ok(false);
        }

        let mut updated = lease.clone();
        if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }
        let renewed = self.replace(&updated).await?;
        if renewed {
            debug!("Renewed leader lease");
        } else {
            warn!("Lease conflict during renewal, lost leadership");
        }
        Ok(renewed)
    }

    /// Gives the lease up so a standby replica can take over immediately.
    pub async fn release(&self) {
        let lease = match self.lease_api.get(LEASE_NAME).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to read lease for release: {}", e);
                return;
            }
        };
        if holder(&lease) != Some(self.identity.as_str()) {
            debug!("Lease not held by us, skipping release");
            return;
        }

        let mut updated = lease.clone();
        if let Some(spec) = updated.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self.replace(&updated).await {
            Ok(true) => info!(identity = %self.identity, "Released leader lease"),
            Ok(false) => warn!("Lease changed before release"),
            Err(e) => warn!("Failed to release leader lease: {}", e),
        }
    }

    pub fn renew_interval(&self) -> Duration {
        RENEW_INTERVAL
    }

    async fn try_acquire(&self) -> anyhow::Result<bool> {
        let now = MicroTime(Utc::now());

        let Some(existing) = self.lease_api.get_opt(LEASE_NAME).await? else {
            return self.create(&now).await;
        };
        let spec = existing.spec.as_ref();
        let ours = holder(&existing) == Some(self.identity.as_str());
        if !ours && !lease_expired(spec, now.0) {
            return Ok(false);
        }

        let mut updated = existing.clone();
        updated.spec = Some(claim(spec, &self.identity, &now, !ours));
        self.replace(&updated).await
    }

    async fn create(&self, now: &MicroTime) -> anyhow::Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(claim(None, &self.identity, now, false)),
        };
        match self.lease_api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Version-checked replace; `Ok(false)` on conflict.
    async fn replace(&self, lease: &Lease) -> anyhow::Result<bool> {
        match self
            .lease_api
            .replace(LEASE_NAME, &PostParams::default(), lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_detect_namespace_prefers_explicit() {
        assert_eq!(detect_namespace("kube-system"), "kube-system");
    }

    #[test]
    fn test_lease_without_renew_time_is_expired() {
        assert!(lease_expired(None, Utc::now()));
        assert!(lease_expired(Some(&LeaseSpec::default()), Utc::now()));
    }

    #[test]
    fn test_lease_expiry_uses_duration() {
        let now = Utc::now();
        let spec = LeaseSpec {
            renew_time: Some(MicroTime(now - ChronoDuration::seconds(10))),
            lease_duration_seconds: Some(15),
            ..Default::default()
        };
        assert!(!lease_expired(Some(&spec), now));
        assert!(lease_expired(Some(&spec), now + ChronoDuration::seconds(10)));
    }

    #[test]
    fn test_claim_takeover_bumps_transitions() {
        let earlier = MicroTime(Utc::now() - ChronoDuration::seconds(60));
        let now = MicroTime(Utc::now());
        let prev = LeaseSpec {
            holder_identity: Some("other".to_string()),
            acquire_time: Some(earlier.clone()),
            lease_transitions: Some(2),
            ..Default::default()
        };

        let taken = claim(Some(&prev), "me", &now, true);
        assert_eq!(taken.holder_identity.as_deref(), Some("me"));
        assert_eq!(taken.lease_transitions, Some(3));
        assert_eq!(taken.acquire_time, Some(now.clone()));

        let renewed = claim(Some(&prev), "me", &now, false);
        assert_eq!(renewed.lease_transitions, Some(2));
        assert_eq!(renewed.acquire_time, Some(earlier));
    }
}
