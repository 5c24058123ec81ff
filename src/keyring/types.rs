//! Keyring data model: `KeyRecord`, `Keyring`, `RotationEvent`, `KeyStatus`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Newest-first rotation log is trimmed to this many entries on every write.
pub const MAX_LOG_ENTRIES: usize = 200;

/// Lifecycle status of a managed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    /// Usable, most recent probe (if any) was under the exhausted threshold.
    Active,
    /// A probe observed a bucket at or above 100%; may recover.
    Exhausted,
    /// Refresh token revoked or probe returned 401. Dead forever.
    Invalid,
    /// Access token's `expires_at` has passed; awaiting refresh.
    Expired,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KeyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "exhausted" => Ok(Self::Exhausted),
            "invalid" => Ok(Self::Invalid),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown key status: {other}")),
        }
    }
}

impl Serialize for KeyStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct KeyStatusVisitor;

        impl serde::de::Visitor<'_> for KeyStatusVisitor {
            type Value = KeyStatus;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("one of: active, exhausted, invalid, expired")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                s.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(KeyStatusVisitor)
    }
}

/// Utilization snapshot from the most recent successful probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UsageSnapshot {
    pub five_hour: f64,
    pub seven_day: f64,
    pub seven_day_sonnet: f64,
    pub checked_at: i64,
}

impl UsageSnapshot {
    /// The metric this engine actually rotates on: the worst of the three buckets.
    #[must_use]
    pub fn max_usage(&self) -> f64 {
        self.five_hour.max(self.seven_day).max(self.seven_day_sonnet)
    }
}

/// One managed OAuth credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub status: KeyStatus,
    pub account_uuid: Option<String>,
    pub account_email: Option<String>,
    pub last_health_check: Option<i64>,
    pub last_usage: Option<UsageSnapshot>,
    pub added_at: i64,
}

/// An audit-log entry. Append-only except for trimming and pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub timestamp: i64,
    pub event: RotationEventKind,
    pub key_id: Option<String>,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictive: Option<bool>,
}

/// The kind of thing that happened, for the rotation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
    KeyAdded,
    KeyRemoved,
    KeyExhausted,
    KeySwitched,
    AccountAuthFailed,
}

/// Top-level persistent state. The sole writer is [`crate::keyring::store::KeyringStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyring {
    pub version: u32,
    pub keys: HashMap<String, KeyRecord>,
    pub active_key_id: Option<String>,
    pub rotation_log: Vec<RotationEvent>,
}

/// The only version this engine understands; readers encountering any other
/// value reset to [`Keyring::default`].
pub const KEYRING_VERSION: u32 = 1;

impl Default for Keyring {
    fn default() -> Self {
        Self {
            version: KEYRING_VERSION,
            keys: HashMap::new(),
            active_key_id: None,
            rotation_log: Vec::new(),
        }
    }
}

impl Keyring {
    /// Prepend `event`, trimming the log to [`MAX_LOG_ENTRIES`].
    pub fn push_event(&mut self, event: RotationEvent) {
        self.rotation_log.insert(0, event);
        self.rotation_log.truncate(MAX_LOG_ENTRIES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_status_round_trips_through_json() {
        for status in [
            KeyStatus::Active,
            KeyStatus::Exhausted,
            KeyStatus::Invalid,
            KeyStatus::Expired,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: KeyStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn key_status_rejects_unknown_value() {
        let result: Result<KeyStatus, _> = serde_json::from_str("\"bogus\"");
        assert!(result.is_err());
    }

    #[test]
    fn push_event_trims_to_max_log_entries() {
        let mut keyring = Keyring::default();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            keyring.push_event(RotationEvent {
                timestamp: i as i64,
                event: RotationEventKind::KeyAdded,
                key_id: None,
                reason: None,
                from_key_id: None,
                to_key_id: None,
                account_email: None,
                predictive: None,
            });
        }
        assert_eq!(keyring.rotation_log.len(), MAX_LOG_ENTRIES);
        // newest-first: the last-pushed event has the highest timestamp.
        assert_eq!(keyring.rotation_log[0].timestamp, (MAX_LOG_ENTRIES + 9) as i64);
    }

    #[test]
    fn usage_snapshot_max_usage_picks_worst_bucket() {
        let usage = UsageSnapshot {
            five_hour: 10.0,
            seven_day: 95.0,
            seven_day_sonnet: 42.0,
            checked_at: 0,
        };
        assert!((usage.max_usage() - 95.0).abs() < f64::EPSILON);
    }
}
