//! Storage quantity parsing and comparison
//!
//! Parses Kubernetes-style storage sizes ("500Gi", "1.5T", "1048576") into
//! exact byte counts so that quantities written in different units can be
//! compared. The input text is kept for display and for patch payloads.

use crate::error::QuantityError;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const KI: u128 = 1 << 10;
const K: u128 = 1_000;

/// Longest magnitude accepted, in digits, before u128 arithmetic could overflow
const MAX_MAGNITUDE_DIGITS: usize = 24;

/// Unit suffix table: binary first, then decimal, then bare bytes
fn multiplier(suffix: &str) -> Option<u128> {
    let m = match suffix {
        "Ki" => KI,
        "Mi" => KI.pow(2),
        "Gi" => KI.pow(3),
        "Ti" => KI.pow(4),
        "Pi" => KI.pow(5),
        "Ei" => KI.pow(6),
        "k" | "K" => K,
        "M" => K.pow(2),
        "G" => K.pow(3),
        "T" => K.pow(4),
        "P" => K.pow(5),
        "E" => K.pow(6),
        "" => 1,
        _ => return None,
    };
    Some(m)
}

/// A parsed storage size
#[derive(Debug, Clone)]
pub struct StorageQuantity {
    bytes: u64,
    text: String,
}

impl StorageQuantity {
    /// Parse a quantity string
    pub fn parse(text: &str) -> Result<Self, QuantityError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (magnitude, suffix) = trimmed.split_at(split);

        let mult = multiplier(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            text: trimmed.to_string(),
            suffix: suffix.to_string(),
        })?;

        let (whole, frac) = match magnitude.split_once('.') {
            Some((w, f)) => (w, f),
            None => (magnitude, ""),
        };
        let well_formed = !(whole.is_empty() && frac.is_empty())
            && !frac.contains('.')
            && !magnitude.ends_with('.');
        if !well_formed {
            return Err(QuantityError::InvalidMagnitude(trimmed.to_string()));
        }
        if whole.len() + frac.len() > MAX_MAGNITUDE_DIGITS {
            return Err(QuantityError::Overflow(trimmed.to_string()));
        }

        // Scaled integer: "1.5" -> 15 / 10
        let digits: String = whole.chars().chain(frac.chars()).collect();
        let scaled: u128 = digits
            .parse()
            .map_err(|_| QuantityError::InvalidMagnitude(trimmed.to_string()))?;
        let scale = 10u128.pow(frac.len() as u32);

        let numerator = scaled
            .checked_mul(mult)
            .ok_or_else(|| QuantityError::Overflow(trimmed.to_string()))?;
        // Fractional bytes round up
        let bytes = numerator.div_ceil(scale);
        let bytes =
            u64::try_from(bytes).map_err(|_| QuantityError::Overflow(trimmed.to_string()))?;

        Ok(Self {
            bytes,
            text: trimmed.to_string(),
        })
    }

    /// Normalized size in bytes
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The quantity as it was written
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Compare two quantities by byte value
pub fn compare(a: &StorageQuantity, b: &StorageQuantity) -> Ordering {
    a.bytes.cmp(&b.bytes)
}

impl PartialEq for StorageQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for StorageQuantity {}

impl PartialOrd for StorageQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl FromStr for StorageQuantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StorageQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for StorageQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}
