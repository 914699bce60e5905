//! # Leader Election
//!
//! Keeps at most one replica reconciling by holding a
//! `coordination.k8s.io/v1` Lease.
//!
//! Every write replaces the Lease with the `resourceVersion` it was read at,
//! so two replicas racing for an expired Lease cannot both win: the loser
//! gets a 409 and waits for the next round.

use crate::config::controller::LeaderElectionConfig;
use crate::constants::{LEASE_DURATION_SECS, LEASE_RENEW_INTERVAL_SECS, LEASE_RETRY_INTERVAL_SECS};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What a replica should do with the Lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    /// We hold it; push the renew time forward
    Renew,
    /// Released or expired; claim it
    TakeOver,
    /// Someone else holds a live Lease
    Wait { holder: String },
}

/// Decide how to treat an existing Lease. A Lease without a renew time or
/// duration counts as expired.
#[must_use]
pub fn lease_action(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let spec = lease.spec.as_ref();
    let holder = spec
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|holder| !holder.is_empty());

    let Some(holder) = holder else {
        return LeaseAction::TakeOver;
    };
    if holder == identity {
        return LeaseAction::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration_secs) {
        (Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    };

    if expired {
        LeaseAction::TakeOver
    } else {
        LeaseAction::Wait {
            holder: holder.to_string(),
        }
    }
}

/// `lease` as written by `identity` at `now`. Keeps the `resourceVersion`,
/// so the write only lands if nobody changed the Lease in between.
#[must_use]
pub fn claimed(lease: &Lease, identity: &str, duration: Duration, now: DateTime<Utc>) -> Lease {
    let mut updated = lease.clone();
    let spec = updated.spec.get_or_insert_with(LeaseSpec::default);
    if spec.holder_identity.as_deref() != Some(identity) {
        spec.holder_identity = Some(identity.to_string());
        spec.acquire_time = Some(MicroTime(now));
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    }
    spec.renew_time = Some(MicroTime(now));
    spec.lease_duration_seconds = Some(duration_secs(duration));
    updated
}

fn duration_secs(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, config: &LeaderElectionConfig) -> Self {
        let api = match &config.namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::default_namespaced(client),
        };
        Self {
            api,
            lease_name: config.lease_name.clone(),
            identity: config.identity.clone(),
            lease_duration: Duration::from_secs(LEASE_DURATION_SECS),
            renew_interval: Duration::from_secs(LEASE_RENEW_INTERVAL_SECS),
            retry_interval: Duration::from_secs(LEASE_RETRY_INTERVAL_SECS),
        }
    }

    /// Block until the Lease is ours. Returns `None` if `shutdown` fires first.
    pub async fn acquire(self: Arc<Self>, shutdown: &CancellationToken) -> Option<LeaderGuard> {
        info!(
            "Waiting for leadership (lease: {}, identity: {})",
            self.lease_name, self.identity
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!("Leadership acquired (identity: {})", self.identity);
                    return Some(self.create_guard());
                }
                Ok(false) => {}
                Err(e) => warn!(
                    "Failed to acquire lease {}, retrying in {}s: {}",
                    self.lease_name,
                    self.retry_interval.as_secs(),
                    e
                ),
            }

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();
        let Some(existing) = self.api.get_opt(&self.lease_name).await? else {
            return self.create_lease(now).await;
        };

        match lease_action(&existing, &self.identity, now) {
            LeaseAction::Wait { holder } => {
                debug!("Lease {} held by {}", self.lease_name, holder);
                Ok(false)
            }
            LeaseAction::TakeOver => {
                let won = self
                    .replace(&claimed(&existing, &self.identity, self.lease_duration, now))
                    .await?;
                if won {
                    info!("Took over lease {}", self.lease_name);
                }
                Ok(won)
            }
            LeaseAction::Renew => {
                self.replace(&claimed(&existing, &self.identity, self.lease_duration, now))
                    .await
            }
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(duration_secs(self.lease_duration)),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {}", self.lease_name);
                Ok(true)
            }
            // Another replica created it first
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Conditional write; `Ok(false)` when the Lease changed since it was read
    async fn replace(&self, lease: &Lease) -> Result<bool, LeaderElectionError> {
        if lease.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(
                self.lease_name.clone(),
            ));
        }
        match self
            .api
            .replace(&self.lease_name, &PostParams::default(), lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!("Lease {} changed concurrently", self.lease_name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => debug!("Lease {} renewed", self.lease_name),
                Ok(false) => {
                    warn!("Leadership lost (lease: {})", self.lease_name);
                    break;
                }
                Err(e) => {
                    warn!("Failed to renew lease {}, giving up leadership: {}", self.lease_name, e);
                    break;
                }
            }
        }
        if lost_tx.send(()).is_err() {
            debug!("Leader guard already dropped");
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let Some(mut lease) = self.api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            debug!("Not the holder of lease {}, nothing to release", self.lease_name);
            return Ok(());
        }
        spec.holder_identity = None;

        if self.replace(&lease).await? {
            info!("Released lease {}", self.lease_name);
        }
        Ok(())
    }
}

/// Held while this replica is the leader. Dropping it stops renewal.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("elector", &self.elector)
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Resolves once renewal has failed
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            // A dropped sender means the renewal task is gone too
            let _lost = rx.await;
        }
    }

    /// Stop renewing and hand the Lease back
    pub async fn release(self) {
        self.renewal_task.abort();
        if let Err(e) = self.elector.release_lease().await {
            warn!("Failed to release lease {}: {}", self.elector.lease_name, e);
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}
