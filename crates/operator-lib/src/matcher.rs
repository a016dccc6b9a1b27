//! Ownership matching between claims and workloads
//!
//! A claim belongs to the workload whose name equals the claim's ownership
//! annotation, within the same namespace. Matching is exact; there is no
//! prefix or wildcard matching.

use crate::models::{VolumeClaim, Workload};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error};

/// A claim paired with its live owning workload
#[derive(Debug, Clone)]
pub struct Match {
    pub workload: Workload,
    pub claim: VolumeClaim,
}

/// Why a claim takes no part in reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No ownership annotation; the claim is not managed by the operator
    Unmanaged,
    /// More than one live workload carries the ownership key
    AmbiguousOwner { candidates: usize },
}

/// A claim whose owning workload does not exist
#[derive(Debug, Clone)]
pub struct OrphanedClaim {
    pub claim: VolumeClaim,
    pub owner: String,
}

#[derive(Debug, Clone)]
pub struct IgnoredClaim {
    pub claim: VolumeClaim,
    pub reason: IgnoreReason,
}

/// Result of matching one namespace
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub matches: Vec<Match>,
    pub orphaned: Vec<OrphanedClaim>,
    pub ignored: Vec<IgnoredClaim>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.matches.len() + self.orphaned.len() + self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition claims into matched, orphaned and ignored
pub fn partition(workloads: &[Workload], claims: Vec<VolumeClaim>) -> Partition {
    let mut by_key: HashMap<(&str, &str), Vec<&Workload>> = HashMap::new();
    for workload in workloads {
        by_key
            .entry((workload.namespace.as_str(), workload.name.as_str()))
            .or_default()
            .push(workload);
    }

    let mut result = Partition::default();

    for claim in claims {
        let Some(owner) = claim.owner.as_deref() else {
            debug!(claim = %claim.claim_ref(), "Claim has no ownership annotation, ignoring");
            result.ignored.push(IgnoredClaim {
                claim,
                reason: IgnoreReason::Unmanaged,
            });
            continue;
        };

        let candidates: &[&Workload] = by_key
            .get(&(claim.namespace.as_str(), owner))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match candidates {
            [] => {
                debug!(claim = %claim.claim_ref(), owner = %owner, "Owning workload not found");
                let owner = owner.to_string();
                result.orphaned.push(OrphanedClaim { claim, owner });
            }
            [workload] => {
                result.matches.push(Match {
                    workload: (*workload).clone(),
                    claim,
                });
            }
            _ => {
                error!(
                    claim = %claim.claim_ref(),
                    owner = %owner,
                    candidates = candidates.len(),
                    "Multiple live workloads match ownership key, skipping claim"
                );
                let reason = IgnoreReason::AmbiguousOwner {
                    candidates: candidates.len(),
                };
                result.ignored.push(IgnoredClaim { claim, reason });
            }
        }
    }

    result
}
