//! Core library for the PVC operator
//!
//! This crate provides:
//! - Storage quantity parsing and comparison
//! - Projection of StatefulSets and PVCs into typed values
//! - Ownership matching, resize decisions and the orphan lifecycle
//! - The reconciliation driver and its cluster/audit collaborators
//! - Health checks and observability

pub mod audit;
pub mod cloudtrail;
pub mod cluster;
pub mod driver;
pub mod error;
pub mod health;
pub mod matcher;
pub mod models;
pub mod observability;
pub mod orphan;
pub mod projection;
pub mod quantity;
pub mod reclaim;
pub mod resize;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use audit::{AuditBackend, AuditSubject, AuditTrail, KubeEventAudit, ResourceKind};
pub use cloudtrail::{CloudTrailAudit, CloudTrailConfig};
pub use cluster::{ClusterApi, KubeCluster};
pub use driver::{PassReport, Plan, ReconcileSettings, Reconciler};
pub use error::{ReconcileError, ReconcileResult};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry};
pub use models::*;
pub use observability::{PassSummary, ReconcileMetrics, StructuredLogger};
pub use orphan::OrphanPolicy;
pub use projection::AnnotationKeys;
pub use quantity::StorageQuantity;
