//! Error types for reconciliation
//!
//! Per-claim errors are caught at the claim boundary by the driver. Only
//! [`ReconcileError::Listing`] is allowed to abort a pass.

use thiserror::Error;

/// Result alias used throughout the library.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Failure to parse a storage quantity string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid magnitude in quantity {0:?}")]
    InvalidMagnitude(String),

    #[error("unknown unit suffix {suffix:?} in quantity {text:?}")]
    UnknownSuffix { text: String, suffix: String },

    #[error("quantity {0:?} overflows the supported range")]
    Overflow(String),
}

/// Errors returned by a [`crate::cluster::ClusterApi`] implementation
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("resource {namespace}/{name} was modified since it was listed")]
    Conflict { namespace: String, name: String },

    #[error("resource {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("cluster API error: {message}")]
    Api { message: String },
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        ClusterError::Api {
            message: err.to_string(),
        }
    }
}

/// Errors returned by a [`crate::audit::AuditTrail`] implementation
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("audit query failed: {message}")]
    Query { message: String },
}

impl From<kube::Error> for AuditError {
    fn from(err: kube::Error) -> Self {
        AuditError::Query {
            message: err.to_string(),
        }
    }
}

/// Reconciliation error taxonomy
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid quantity on {object}: {source}")]
    InvalidQuantity {
        object: String,
        #[source]
        source: QuantityError,
    },

    #[error("workload {workload} has a missing or malformed storage-size annotation")]
    MissingSizeAnnotation { workload: String },

    #[error("conflict updating {claim}, leaving it for the next pass")]
    Conflict { claim: String },

    #[error("claim {claim} no longer exists")]
    NotFound { claim: String },

    #[error("audit lookup failed for {resource}: {source}")]
    AuditLookup {
        resource: String,
        #[source]
        source: AuditError,
    },

    #[error("failed to list {what} in namespace {namespace}: {source}")]
    Listing {
        what: &'static str,
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("cluster API error on {claim}: {source}")]
    Api {
        claim: String,
        #[source]
        source: ClusterError,
    },
}

impl ReconcileError {
    /// Map an apply-phase [`ClusterError`] onto the taxonomy
    pub fn from_apply(claim: impl Into<String>, err: ClusterError) -> Self {
        let claim = claim.into();
        match err {
            ClusterError::Conflict { .. } => ReconcileError::Conflict { claim },
            ClusterError::NotFound { .. } => ReconcileError::NotFound { claim },
            other => ReconcileError::Api {
                claim,
                source: other,
            },
        }
    }

    /// Whether the failure only aborts the current entity
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Conflict { .. } | ReconcileError::NotFound { .. }
        )
    }
}
