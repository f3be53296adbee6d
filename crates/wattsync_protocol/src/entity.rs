//! Synchronizable entities, version tags and cursor markers.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of entity being synchronized.
///
/// Each class is reconciled independently and owns its own queue and
/// remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    /// A supply contract, composed of contract modifications and devices.
    Contract,
    /// Aggregated meter readings, tracked per metering device.
    Measurement,
    /// Hourly load profile points, tracked per contract.
    Profile,
    /// A pricelist/tariff pair.
    Tariff,
}

impl EntityClass {
    /// All entity classes in dispatch order.
    pub const ALL: [EntityClass; 4] = [
        EntityClass::Contract,
        EntityClass::Measurement,
        EntityClass::Profile,
        EntityClass::Tariff,
    ];

    /// Returns the stable name of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Contract => "contract",
            EntityClass::Measurement => "measurement",
            EntityClass::Profile => "profile",
            EntityClass::Tariff => "tariff",
        }
    }

    /// Returns true if entities of this class are pushed as whole documents
    /// guarded by a version tag.
    pub fn is_versioned(&self) -> bool {
        matches!(self, EntityClass::Contract | EntityClass::Tariff)
    }

    /// Returns true if entities of this class are time series tracked by a
    /// timestamp marker.
    pub fn is_series(&self) -> bool {
        matches!(self, EntityClass::Measurement | EntityClass::Profile)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        EntityClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownClass(s.to_string()))
    }
}

/// A reference to a local entity.
///
/// `id` is the system-of-record identifier; `key` is the natural key the
/// remote store uses (for example a contract code or a meter serial).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity class.
    pub class: EntityClass,
    /// Local identifier.
    pub id: u64,
    /// Natural key in the remote store.
    pub key: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(class: EntityClass, id: u64, key: impl Into<String>) -> Self {
        Self {
            class,
            id,
            key: key.into(),
        }
    }

    /// Creates a contract reference.
    pub fn contract(id: u64, key: impl Into<String>) -> Self {
        Self::new(EntityClass::Contract, id, key)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.key)
    }
}

/// An opaque version token returned by the remote store on every write.
///
/// Updates must present the tag of the version they were based on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    /// Wraps a raw tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordering key recording how far an entity has been confirmed pushed.
///
/// A single entity always uses the same marker variant, so comparisons
/// only happen between like variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// Timestamp of the last confirmed point.
    At(DateTime<Utc>),
    /// Monotonic sequence of the last confirmed point.
    Seq(u64),
}

impl Marker {
    /// Returns the timestamp if this is a time marker.
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Marker::At(at) => Some(*at),
            Marker::Seq(_) => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::At(at) => write!(f, "{}", at.to_rfc3339()),
            Marker::Seq(seq) => write!(f, "#{seq}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn class_names_roundtrip() {
        for class in EntityClass::ALL {
            assert_eq!(class.as_str().parse::<EntityClass>().unwrap(), class);
        }
        assert!("invoice".parse::<EntityClass>().is_err());
    }

    #[test]
    fn class_kinds() {
        assert!(EntityClass::Contract.is_versioned());
        assert!(EntityClass::Tariff.is_versioned());
        assert!(EntityClass::Measurement.is_series());
        assert!(EntityClass::Profile.is_series());
        assert!(!EntityClass::Contract.is_series());
    }

    #[test]
    fn entity_display() {
        let entity = EntityRef::contract(7, "C-0042");
        assert_eq!(entity.to_string(), "contract:C-0042");
    }

    #[test]
    fn time_markers_order_chronologically() {
        let early = Marker::At(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let late = Marker::At(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap());
        assert!(early < late);
        assert_eq!(late.as_time().unwrap().to_string(), "2023-01-02 00:00:00 UTC");
        assert!(Marker::Seq(1) < Marker::Seq(2));
    }

    #[test]
    fn version_tag_is_transparent_in_json() {
        let tag = VersionTag::new("abc123");
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"abc123\"");
    }
}
