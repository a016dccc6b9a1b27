//! In-memory [`ClusterApi`] and [`AuditTrail`] doubles
//!
//! Used by unit and integration tests to drive full passes without an API
//! server. The fakes keep the per-call contracts of the real adapters:
//! patches and deletes honor the listed resource version, deletes of
//! missing claims report `NotFound`.

use crate::audit::{AuditSubject, AuditTrail, ResourceKind};
use crate::cluster::ClusterApi;
use crate::error::{AuditError, ClusterError};
use crate::models::{ClaimRef, SizeField, VolumeClaim, Workload};
use crate::quantity::StorageQuantity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build a workload
pub fn workload(namespace: &str, name: &str, size: Option<&str>, replicas: Option<i32>) -> Workload {
    Workload {
        namespace: namespace.into(),
        name: name.into(),
        desired_size: SizeField::from_raw(size),
        replicas,
    }
}

/// Build a claim
pub fn claim(namespace: &str, name: &str, owner: Option<&str>, capacity: Option<&str>) -> VolumeClaim {
    VolumeClaim {
        namespace: namespace.into(),
        name: name.into(),
        owner: owner.map(String::from),
        capacity: SizeField::from_raw(capacity),
        resource_version: Some("1".into()),
        volume: Some(format!("pv-{}", name)),
    }
}

/// A mutation observed by [`FakeCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Patched { claim: String, size: String },
    Deleted { claim: String },
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    workloads: Vec<Workload>,
    claims: Vec<VolumeClaim>,
    mutations: Vec<Mutation>,
}

/// In-memory cluster
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    failing_listings: HashSet<String>,
    conflicts: HashSet<String>,
    failures: HashSet<String>,
    vanished: HashSet<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        lock(&self.state).namespaces.insert(namespace.to_string());
        self
    }

    pub fn with_workload(self, workload: Workload) -> Self {
        {
            let mut state = lock(&self.state);
            state.namespaces.insert(workload.namespace.clone());
            state.workloads.push(workload);
        }
        self
    }

    pub fn with_claim(self, claim: VolumeClaim) -> Self {
        {
            let mut state = lock(&self.state);
            state.namespaces.insert(claim.namespace.clone());
            state.claims.push(claim);
        }
        self
    }

    /// Listing anything in `namespace` fails
    pub fn failing_listing(mut self, namespace: &str) -> Self {
        self.failing_listings.insert(namespace.to_string());
        self
    }

    /// Writes to the named claim fail with a conflict, as if it changed after listing
    pub fn conflicting(mut self, claim: &str) -> Self {
        self.conflicts.insert(claim.to_string());
        self
    }

    /// The named claim is removed by someone else right after it is listed
    pub fn vanishing(mut self, claim: &str) -> Self {
        self.vanished.insert(claim.to_string());
        self
    }

    /// Writes to the named claim fail with a generic API error
    pub fn failing_writes(mut self, claim: &str) -> Self {
        self.failures.insert(claim.to_string());
        self
    }

    pub fn remove_workload(&self, namespace: &str, name: &str) {
        lock(&self.state)
            .workloads
            .retain(|w| !(w.namespace == namespace && w.name == name));
    }

    pub fn set_replicas(&self, namespace: &str, name: &str, replicas: i32) {
        let mut state = lock(&self.state);
        for w in state.workloads.iter_mut() {
            if w.namespace == namespace && w.name == name {
                w.replicas = Some(replicas);
            }
        }
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<VolumeClaim> {
        lock(&self.state)
            .claims
            .iter()
            .find(|c| c.namespace == namespace && c.name == name)
            .cloned()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.state).mutations.clone()
    }

    fn check_listing(&self, namespace: &str) -> Result<(), ClusterError> {
        if self.failing_listings.contains(namespace) {
            return Err(ClusterError::Api {
                message: format!("listing in {} refused", namespace),
            });
        }
        Ok(())
    }

    fn check_write(&self, claim: &ClaimRef) -> Result<(), ClusterError> {
        if self.vanished.contains(&claim.name) {
            return Err(ClusterError::NotFound {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            });
        }
        if self.conflicts.contains(&claim.name) {
            return Err(ClusterError::Conflict {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            });
        }
        if self.failures.contains(&claim.name) {
            return Err(ClusterError::Api {
                message: "internal error".into(),
            });
        }
        Ok(())
    }
}

fn stale(stored: &VolumeClaim, claim: &ClaimRef) -> bool {
    match (&claim.resource_version, &stored.resource_version) {
        (Some(expected), Some(actual)) => expected != actual,
        _ => false,
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        self.check_listing("*")?;
        Ok(lock(&self.state).namespaces.iter().cloned().collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, ClusterError> {
        self.check_listing(namespace)?;
        Ok(lock(&self.state)
            .workloads
            .iter()
            .filter(|w| w.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_volume_claims(&self, namespace: &str) -> Result<Vec<VolumeClaim>, ClusterError> {
        self.check_listing(namespace)?;
        Ok(lock(&self.state)
            .claims
            .iter()
            .filter(|c| c.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn patch_capacity(
        &self,
        claim: &ClaimRef,
        new_size: &StorageQuantity,
    ) -> Result<(), ClusterError> {
        self.check_write(claim)?;
        let mut state = lock(&self.state);
        let stored = state
            .claims
            .iter_mut()
            .find(|c| c.namespace == claim.namespace && c.name == claim.name)
            .ok_or_else(|| ClusterError::NotFound {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            })?;
        if stale(stored, claim) {
            return Err(ClusterError::Conflict {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            });
        }

        stored.capacity = SizeField::Present(new_size.clone());
        let next = stored
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        stored.resource_version = Some(next.to_string());
        state.mutations.push(Mutation::Patched {
            claim: claim.to_string(),
            size: new_size.to_string(),
        });
        Ok(())
    }

    async fn delete_claim(&self, claim: &ClaimRef) -> Result<(), ClusterError> {
        self.check_write(claim)?;
        let mut state = lock(&self.state);
        let position = state
            .claims
            .iter()
            .position(|c| c.namespace == claim.namespace && c.name == claim.name)
            .ok_or_else(|| ClusterError::NotFound {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            })?;
        if stale(&state.claims[position], claim) {
            return Err(ClusterError::Conflict {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            });
        }

        state.claims.remove(position);
        state.mutations.push(Mutation::Deleted {
            claim: claim.to_string(),
        });
        Ok(())
    }
}

/// In-memory audit trail with fixed deletion times
#[derive(Default)]
pub struct StaticAudit {
    deletions: HashMap<(String, String, String), DateTime<Utc>>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    window_starts: Mutex<Vec<DateTime<Utc>>>,
    volumes: Mutex<Vec<Option<String>>>,
}

impl StaticAudit {
    pub fn with_deletion(
        mut self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Self {
        self.deletions.insert(
            (kind.as_str().to_string(), namespace.to_string(), name.to_string()),
            at,
        );
        self
    }

    /// Every query fails with `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Every query sleeps before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of queries received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Window start of the most recent query
    pub fn last_window_start(&self) -> Option<DateTime<Utc>> {
        lock(&self.window_starts).last().copied()
    }

    /// Bound volumes passed with each query, in order
    pub fn volumes_seen(&self) -> Vec<Option<String>> {
        lock(&self.volumes).clone()
    }

    fn failure(&self) -> Result<(), AuditError> {
        match &self.failure {
            Some(message) => Err(AuditError::Query {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuditTrail for StaticAudit {
    async fn find_deletion_event(
        &self,
        subject: &AuditSubject<'_>,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.window_starts).push(since);
        lock(&self.volumes).push(subject.volume.map(String::from));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.failure()?;
        let key = (
            subject.kind.as_str().to_string(),
            subject.namespace.to_string(),
            subject.name.to_string(),
        );
        Ok(self.deletions.get(&key).copied().filter(|at| *at >= since))
    }

    async fn check(&self) -> Result<(), AuditError> {
        self.failure()
    }
}
