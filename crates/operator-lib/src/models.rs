//! Core data models for the PVC operator

use crate::error::QuantityError;
use crate::quantity::StorageQuantity;
use serde::Serialize;
use std::fmt;

/// Identity of a claim as observed at listing time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
    /// Version observed when listed; writes are conditional on it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ClaimRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version: None,
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A size read from an annotation or a spec field
#[derive(Debug, Clone, PartialEq)]
pub enum SizeField {
    Present(StorageQuantity),
    Missing,
    Malformed { raw: String, error: QuantityError },
}

impl SizeField {
    /// Project an optional raw string into a typed size
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => SizeField::Missing,
            Some(text) => match StorageQuantity::parse(text) {
                Ok(q) => SizeField::Present(q),
                Err(error) => SizeField::Malformed {
                    raw: text.to_string(),
                    error,
                },
            },
        }
    }

    pub fn quantity(&self) -> Option<&StorageQuantity> {
        match self {
            SizeField::Present(q) => Some(q),
            _ => None,
        }
    }
}

/// A stateful workload (StatefulSet) as seen by the operator
#[derive(Debug, Clone)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub desired_size: SizeField,
    pub replicas: Option<i32>,
}

impl Workload {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A persistent volume claim as seen by the operator
#[derive(Debug, Clone)]
pub struct VolumeClaim {
    pub namespace: String,
    pub name: String,
    /// Owning workload name from the ownership annotation
    pub owner: Option<String>,
    pub capacity: SizeField,
    pub resource_version: Option<String>,
    /// Bound persistent volume
    pub volume: Option<String>,
}

impl VolumeClaim {
    pub fn claim_ref(&self) -> ClaimRef {
        ClaimRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            resource_version: self.resource_version.clone(),
        }
    }

    /// Instance ordinal from a `<volume>-<workload>-<N>` style name
    pub fn ordinal(&self) -> Option<u32> {
        let (_, last) = self.name.rsplit_once('-')?;
        if last.is_empty() || !last.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        last.parse().ok()
    }
}

/// Why a claim is being deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// The owning workload no longer exists
    Orphaned,
    /// The owning workload was scaled below this claim's ordinal
    ScaledDown,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteReason::Orphaned => f.write_str("orphaned"),
            DeleteReason::ScaledDown => f.write_str("scaled_down"),
        }
    }
}

/// A mutation decided by the engines and applied by the driver
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ResizePatch {
        claim: ClaimRef,
        new_size: StorageQuantity,
    },
    DeleteClaim {
        claim: ClaimRef,
        reason: DeleteReason,
    },
}

impl Action {
    pub fn claim(&self) -> &ClaimRef {
        match self {
            Action::ResizePatch { claim, .. } | Action::DeleteClaim { claim, .. } => claim,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Action::DeleteClaim { .. })
    }
}
