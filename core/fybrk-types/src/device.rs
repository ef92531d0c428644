//! Devices: stable opaque identifiers for engine instances, plus the
//! bookkeeping record the catalog keeps per paired peer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable opaque identifier for an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (32 hex chars).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a device handles replicated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceProfile {
    /// Store all data.
    FullReplica,
    /// Cache recent files.
    SmartCache,
    /// Metadata only.
    IndexOnly,
}

impl DeviceProfile {
    pub fn as_i32(self) -> i32 {
        match self {
            DeviceProfile::FullReplica => 0,
            DeviceProfile::SmartCache => 1,
            DeviceProfile::IndexOnly => 2,
        }
    }

    /// Decode from the catalog's integer column. Unknown values fall back
    /// to `FullReplica`, the least surprising behavior for an old catalog
    /// read by newer code.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => DeviceProfile::SmartCache,
            2 => DeviceProfile::IndexOnly,
            _ => DeviceProfile::FullReplica,
        }
    }
}

/// A paired peer as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub profile: DeviceProfile,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_hex() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn profile_integer_roundtrip() {
        for profile in [
            DeviceProfile::FullReplica,
            DeviceProfile::SmartCache,
            DeviceProfile::IndexOnly,
        ] {
            assert_eq!(DeviceProfile::from_i32(profile.as_i32()), profile);
        }
        assert_eq!(DeviceProfile::from_i32(99), DeviceProfile::FullReplica);
    }
}
