//! Cluster resource API
//!
//! [`ClusterApi`] is the seam between the reconciliation driver and the
//! Kubernetes API server. [`KubeCluster`] is the production implementation.

use crate::error::ClusterError;
use crate::models::{ClaimRef, VolumeClaim, Workload};
use crate::projection::{project_claim, project_workload, AnnotationKeys};
use crate::quantity::StorageQuantity;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, Preconditions};
use kube::Client;
use serde_json::json;
use tracing::debug;

/// Operations the driver needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;

    /// Stateful workloads in a namespace
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, ClusterError>;

    /// Volume claims in a namespace
    async fn list_volume_claims(&self, namespace: &str) -> Result<Vec<VolumeClaim>, ClusterError>;

    /// Set the requested storage of a claim. Fails with
    /// [`ClusterError::Conflict`] when the claim changed since it was listed.
    async fn patch_capacity(
        &self,
        claim: &ClaimRef,
        new_size: &StorageQuantity,
    ) -> Result<(), ClusterError>;

    /// Delete a claim
    async fn delete_claim(&self, claim: &ClaimRef) -> Result<(), ClusterError>;
}

/// Production cluster client using the kube crate
pub struct KubeCluster {
    client: Client,
    keys: AnnotationKeys,
}

impl KubeCluster {
    pub fn new(client: Client, keys: AnnotationKeys) -> Self {
        debug!(
            storage_size = %keys.storage_size,
            owner = %keys.owner,
            "Cluster client configured"
        );
        Self { client, keys }
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube error onto the claim it concerns
fn claim_error(err: kube::Error, claim: &ClaimRef) -> ClusterError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 409 => ClusterError::Conflict {
            namespace: claim.namespace.clone(),
            name: claim.name.clone(),
        },
        kube::Error::Api(ref resp) if resp.code == 404 => ClusterError::NotFound {
            namespace: claim.namespace.clone(),
            name: claim.name.clone(),
        },
        other => other.into(),
    }
}

/// JSON merge patch growing a claim, conditional on the listed resource version
pub fn capacity_patch(claim: &ClaimRef, new_size: &StorageQuantity) -> serde_json::Value {
    let mut patch = json!({
        "spec": {"resources": {"requests": {"storage": new_size.as_str()}}}
    });
    if let Some(version) = &claim.resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    patch
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, ClusterError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(|sts| project_workload(sts, &self.keys))
            .collect())
    }

    async fn list_volume_claims(&self, namespace: &str) -> Result<Vec<VolumeClaim>, ClusterError> {
        let list = self.claims(namespace).list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(|pvc| project_claim(pvc, &self.keys))
            .collect())
    }

    async fn patch_capacity(
        &self,
        claim: &ClaimRef,
        new_size: &StorageQuantity,
    ) -> Result<(), ClusterError> {
        let patch = capacity_patch(claim, new_size);
        self.claims(&claim.namespace)
            .patch(&claim.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| claim_error(e, claim))?;
        Ok(())
    }

    async fn delete_claim(&self, claim: &ClaimRef) -> Result<(), ClusterError> {
        let dp = DeleteParams {
            preconditions: claim.resource_version.as_ref().map(|version| Preconditions {
                resource_version: Some(version.clone()),
                uid: None,
            }),
            ..Default::default()
        };
        self.claims(&claim.namespace)
            .delete(&claim.name, &dp)
            .await
            .map_err(|e| claim_error(e, claim))?;
        Ok(())
    }
}
