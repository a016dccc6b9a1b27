//! Resize decisions
//!
//! Volumes can only grow. A claim is patched when the owning workload
//! declares a larger size than the claim currently requests; a smaller
//! declaration is reported and otherwise left alone.

use crate::error::{QuantityError, ReconcileError, ReconcileResult};
use crate::matcher::Match;
use crate::models::{Action, SizeField};
use crate::quantity::{compare, StorageQuantity};
use std::cmp::Ordering;
use tracing::debug;

/// Outcome of comparing declared and current size for one match
#[derive(Debug, Clone, PartialEq)]
pub enum ResizeDecision {
    Grow(Action),
    UpToDate,
    /// Declared size is below the current capacity; shrinking is never attempted
    ShrinkRefused {
        declared: StorageQuantity,
        current: StorageQuantity,
    },
}

impl ResizeDecision {
    pub fn into_action(self) -> Option<Action> {
        match self {
            ResizeDecision::Grow(action) => Some(action),
            _ => None,
        }
    }
}

/// Decide whether a matched claim needs to grow
pub fn decide(m: &Match) -> ReconcileResult<ResizeDecision> {
    let declared = match &m.workload.desired_size {
        SizeField::Present(q) => q,
        SizeField::Missing | SizeField::Malformed { .. } => {
            return Err(ReconcileError::MissingSizeAnnotation {
                workload: m.workload.key(),
            });
        }
    };

    let current = match &m.claim.capacity {
        SizeField::Present(q) => q,
        SizeField::Missing => {
            return Err(ReconcileError::InvalidQuantity {
                object: m.claim.claim_ref().to_string(),
                source: QuantityError::Empty,
            });
        }
        SizeField::Malformed { error, .. } => {
            return Err(ReconcileError::InvalidQuantity {
                object: m.claim.claim_ref().to_string(),
                source: error.clone(),
            });
        }
    };

    let decision = match compare(declared, current) {
        Ordering::Greater => ResizeDecision::Grow(Action::ResizePatch {
            claim: m.claim.claim_ref(),
            new_size: declared.clone(),
        }),
        Ordering::Equal => {
            debug!(claim = %m.claim.claim_ref(), size = %current, "Size already matches");
            ResizeDecision::UpToDate
        }
        Ordering::Less => ResizeDecision::ShrinkRefused {
            declared: declared.clone(),
            current: current.clone(),
        },
    };

    Ok(decision)
}
