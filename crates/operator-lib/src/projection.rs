//! Annotation projection
//!
//! Turns raw StatefulSet and PersistentVolumeClaim objects into typed
//! [`Workload`] and [`VolumeClaim`] values. Malformed annotations end up as
//! [`SizeField::Malformed`] here so the engines never see raw strings.

use crate::models::{SizeField, VolumeClaim, Workload};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Default annotation prefix
pub const DEFAULT_ANNOTATION_PREFIX: &str = "pvc-operator";

/// Annotation suffix carrying the desired size on a workload
pub const STORAGE_SIZE_SUFFIX: &str = "storage-size";

/// Annotation suffix naming the owning workload on a claim
pub const OWNER_SUFFIX: &str = "statefulset";

/// Fully qualified annotation keys for one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub storage_size: String,
    pub owner: String,
}

impl AnnotationKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            storage_size: format!("{}/{}", prefix, STORAGE_SIZE_SUFFIX),
            owner: format!("{}/{}", prefix, OWNER_SUFFIX),
        }
    }
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_ANNOTATION_PREFIX)
    }
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Project a StatefulSet into a [`Workload`]
pub fn project_workload(sts: &StatefulSet, keys: &AnnotationKeys) -> Workload {
    let meta = &sts.metadata;
    Workload {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        desired_size: SizeField::from_raw(annotation(meta, &keys.storage_size)),
        replicas: sts.spec.as_ref().and_then(|spec| spec.replicas),
    }
}

/// Project a PersistentVolumeClaim into a [`VolumeClaim`]
pub fn project_claim(pvc: &PersistentVolumeClaim, keys: &AnnotationKeys) -> VolumeClaim {
    let meta = &pvc.metadata;
    let requested = pvc
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .map(|q| q.0.as_str());

    let volume = pvc
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let owner = annotation(meta, &keys.owner)
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .map(str::to_string);

    VolumeClaim {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        owner,
        capacity: SizeField::from_raw(requested),
        resource_version: meta.resource_version.clone(),
        volume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn meta(name: &str, annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            resource_version: Some("42".into()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn pvc(name: &str, annotations: &[(&str, &str)], storage: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: meta(name, annotations),
            spec: Some(PersistentVolumeClaimSpec {
                resources: Some(ResourceRequirements {
                    requests: storage.map(|s| {
                        BTreeMap::from([("storage".to_string(), Quantity(s.to_string()))])
                    }),
                    ..Default::default()
                }),
                volume_name: Some(format!("pv-{}", name)),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_keys_from_prefix() {
        let keys = AnnotationKeys::with_prefix("pvc-operator/");
        assert_eq!(keys.storage_size, "pvc-operator/storage-size");
        assert_eq!(keys.owner, "pvc-operator/statefulset");
    }

    #[test]
    fn test_project_workload() {
        let keys = AnnotationKeys::default();
        let sts = StatefulSet {
            metadata: meta("web", &[("pvc-operator/storage-size", "500Gi")]),
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            status: None,
        };

        let workload = project_workload(&sts, &keys);
        assert_eq!(workload.name, "web");
        assert_eq!(workload.replicas, Some(3));
        assert_eq!(
            workload.desired_size.quantity().map(|q| q.as_str()),
            Some("500Gi")
        );
    }

    #[test]
    fn test_project_workload_with_malformed_size() {
        let keys = AnnotationKeys::default();
        let sts = StatefulSet {
            metadata: meta("web", &[("pvc-operator/storage-size", "lots")]),
            spec: None,
            status: None,
        };

        let workload = project_workload(&sts, &keys);
        assert!(matches!(workload.desired_size, SizeField::Malformed { .. }));
        assert_eq!(workload.replicas, None);
    }

    #[test]
    fn test_project_claim() {
        let keys = AnnotationKeys::default();
        let claim = project_claim(
            &pvc("data-web-0", &[("pvc-operator/statefulset", "web")], Some("100Gi")),
            &keys,
        );

        assert_eq!(claim.owner.as_deref(), Some("web"));
        assert_eq!(claim.capacity.quantity().map(|q| q.as_str()), Some("100Gi"));
        assert_eq!(claim.resource_version.as_deref(), Some("42"));
        assert_eq!(claim.volume.as_deref(), Some("pv-data-web-0"));
    }

    #[test]
    fn test_project_claim_without_owner_or_size() {
        let keys = AnnotationKeys::default();
        let claim = project_claim(&pvc("scratch", &[("pvc-operator/statefulset", " ")], None), &keys);

        assert_eq!(claim.owner, None);
        assert_eq!(claim.capacity, SizeField::Missing);
    }

    #[test]
    fn test_custom_prefix_ignores_default_keys() {
        let keys = AnnotationKeys::with_prefix("storage.example.com");
        let claim = project_claim(
            &pvc("data-web-0", &[("pvc-operator/statefulset", "web")], Some("1Gi")),
            &keys,
        );
        assert_eq!(claim.owner, None);
    }
}
