//! Leader Election Record
//!
//! The payload stored per election. Field names follow the resource-lock
//! JSON layout so records written by other election clients decode here
//! and vice versa.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who holds leadership, since when, and how often it changed hands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionRecord {
    /// Identity of the current holder (empty when released)
    #[serde(default)]
    pub holder_identity: String,

    /// Lease duration the holder promised to renew within
    #[serde(default)]
    pub lease_duration_seconds: i64,

    /// When the current holder acquired leadership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<DateTime<Utc>>,

    /// When the current holder last renewed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<DateTime<Utc>>,

    /// Number of times leadership has changed hands
    #[serde(default)]
    pub leader_transitions: i32,

    /// Coordinated leader election strategy, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Holder the current leader should hand over to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_holder: Option<String>,
}

impl LeaderElectionRecord {
    /// Create a freshly acquired record for `holder`
    pub fn acquired(holder: impl Into<String>, lease_duration_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            holder_identity: holder.into(),
            lease_duration_seconds,
            acquire_time: Some(now),
            renew_time: Some(now),
            ..Default::default()
        }
    }

    /// Serialize to the stored JSON document
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(crate::Error::Encode)
    }

    /// Parse a stored JSON document
    pub fn from_json(name: &str, raw: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(raw).map_err(|source| crate::Error::Decode {
            name: name.to_string(),
            source,
        })
    }
}
