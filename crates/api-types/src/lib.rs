//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the kubelet plugin and
//! the orchestrator: the rendered device representation (attributes and
//! capacities) and the on-disk checkpoint document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// Fully qualified attribute or capacity name, e.g. `cardIndex` or
/// `resource.kubernetes.io/pcieRoot`
pub type QualifiedName = String;

/// A single typed device attribute value.
///
/// Serialized the way the resource API expects it: exactly one of
/// `string`, `int`, `bool` or `version` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAttribute {
    String(String),
    Int(i64),
    Bool(bool),
    Version(String),
}

impl DeviceAttribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DeviceAttribute::String(s) | DeviceAttribute::Version(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DeviceAttribute::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAttribute::String(s) | DeviceAttribute::Version(s) => write!(f, "{s}"),
            DeviceAttribute::Int(v) => write!(f, "{v}"),
            DeviceAttribute::Bool(v) => write!(f, "{v}"),
        }
    }
}

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ei", 60),
    ("Pi", 50),
    ("Ti", 40),
    ("Gi", 30),
    ("Mi", 20),
    ("Ki", 10),
];

/// Integer quantity rendered in binary SI form (`80Gi`, `512Mi`, `304`).
///
/// The canonical form uses the largest binary suffix that divides the value
/// exactly and falls back to the plain integer otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(pub i64);

impl Quantity {
    pub fn binary_si(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value != 0 {
            for (suffix, shift) in BINARY_SUFFIXES {
                let unit = 1i64 << shift;
                if value % unit == 0 {
                    return write!(f, "{}{suffix}", value / unit);
                }
            }
        }
        write!(f, "{value}")
    }
}

/// Error returned when a quantity string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseQuantityError(pub String);

impl fmt::Display for ParseQuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid binary SI quantity `{}`", self.0)
    }
}

impl std::error::Error for ParseQuantityError {}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, shift) = BINARY_SUFFIXES
            .iter()
            .find_map(|(suffix, shift)| s.strip_suffix(suffix).map(|d| (d, *shift)))
            .unwrap_or((s, 0));

        let base: i64 = digits
            .parse()
            .map_err(|_| ParseQuantityError(s.to_string()))?;
        base.checked_mul(1i64 << shift)
            .map(Quantity)
            .ok_or_else(|| ParseQuantityError(s.to_string()))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Device representation published to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Canonical device name, unique on the node
    pub name: String,
    /// Typed attributes used for selection
    pub attributes: BTreeMap<QualifiedName, DeviceAttribute>,
    /// Consumable capacities
    pub capacity: BTreeMap<QualifiedName, Quantity>,
}

impl Device {
    pub fn attribute(&self, name: &str) -> Option<&DeviceAttribute> {
        self.attributes.get(name)
    }

    pub fn capacity(&self, name: &str) -> Option<Quantity> {
        self.capacity.get(name).copied()
    }
}

/// Claim UID to the canonical names of the devices prepared for it
pub type PreparedClaims = BTreeMap<String, Vec<String>>;

/// Persisted allocation bookkeeping.
///
/// `checksum` covers the compact JSON encoding of the document with the
/// checksum itself set to zero. A missing `v1` section is a valid, empty
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub checksum: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v1: Option<CheckpointV1>,
}

/// Version 1 payload of the checkpoint document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointV1 {
    #[serde(
        rename = "preparedClaims",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub prepared_claims: PreparedClaims,
}

impl Checkpoint {
    /// Build an unsigned checkpoint holding `claims`
    pub fn new(claims: PreparedClaims) -> Self {
        Self {
            checksum: 0,
            v1: Some(CheckpointV1 {
                prepared_claims: claims,
            }),
        }
    }

    /// Prepared claims, empty when the `v1` section is absent
    pub fn prepared_claims(&self) -> PreparedClaims {
        self.v1
            .as_ref()
            .map(|v1| v1.prepared_claims.clone())
            .unwrap_or_default()
    }
}
