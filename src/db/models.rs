//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(CheckStatus::Up),
            "down" => Some(CheckStatus::Down),
            _ => None,
        }
    }
}

/// Denormalized status of a target. `Unknown` until the first check lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Up => "up",
            TargetStatus::Down => "down",
            TargetStatus::Unknown => "unknown",
        }
    }

    /// Anything unrecognised (including NULL columns from older rows) reads as unknown.
    pub fn from_db(s: Option<&str>) -> Self {
        match s.and_then(CheckStatus::parse) {
            Some(status) => status.into(),
            None => TargetStatus::Unknown,
        }
    }
}

impl From<CheckStatus> for TargetStatus {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Up => TargetStatus::Up,
            CheckStatus::Down => TargetStatus::Down,
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub address: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub importance: Option<String>,
    pub remark: Option<String>,
    pub last_status: TargetStatus,
    pub last_ping_ms: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Registration payload for a target. Also used for metadata edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTarget {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl NewTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Trim every field, drop blank optionals and apply registration defaults.
    ///
    /// Returns `None` when the address is blank.
    pub fn normalized(self) -> Option<Self> {
        let address = self.address.trim().to_string();
        if address.is_empty() {
            return None;
        }

        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        Some(Self {
            address,
            name: clean(self.name),
            device_type: clean(self.device_type).or_else(|| Some("other".to_string())),
            importance: clean(self.importance).or_else(|| Some("normal".to_string())),
            remark: clean(self.remark),
        })
    }
}

/// What a prober reports for one check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub ping_ms: Option<f64>,
}

impl CheckOutcome {
    pub fn up(ping_ms: f64) -> Self {
        Self {
            status: CheckStatus::Up,
            ping_ms: Some(ping_ms),
        }
    }

    pub fn down() -> Self {
        Self {
            status: CheckStatus::Down,
            ping_ms: None,
        }
    }

    /// Latency as it should be persisted: only for `up`, never negative or NaN.
    pub fn latency(&self) -> Option<f64> {
        match self.status {
            CheckStatus::Up => self.ping_ms.filter(|ms| ms.is_finite()).map(|ms| ms.max(0.0)),
            CheckStatus::Down => None,
        }
    }
}

/// One immutable, timestamped check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    pub target_id: i64,
    pub time: DateTime<Utc>,
    pub status: CheckStatus,
    pub ping_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_applies_defaults() {
        let target = NewTarget {
            address: "  10.0.0.1 ".to_string(),
            name: Some("  ".to_string()),
            remark: Some(" rack 4 ".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap();

        assert_eq!(target.address, "10.0.0.1");
        assert_eq!(target.name, None);
        assert_eq!(target.device_type.as_deref(), Some("other"));
        assert_eq!(target.importance.as_deref(), Some("normal"));
        assert_eq!(target.remark.as_deref(), Some("rack 4"));
    }

    #[test]
    fn test_normalized_rejects_blank_address() {
        assert!(NewTarget::new("   ").normalized().is_none());
    }

    #[test]
    fn test_down_outcome_has_no_latency() {
        let outcome = CheckOutcome {
            status: CheckStatus::Down,
            ping_ms: Some(3.0),
        };
        assert_eq!(outcome.latency(), None);
        assert_eq!(CheckOutcome::up(-1.0).latency(), Some(0.0));
        assert_eq!(CheckOutcome::up(f64::NAN).latency(), None);
    }

    #[test]
    fn test_target_status_from_db() {
        assert_eq!(TargetStatus::from_db(Some("up")), TargetStatus::Up);
        assert_eq!(TargetStatus::from_db(Some("down")), TargetStatus::Down);
        assert_eq!(TargetStatus::from_db(Some("unknown")), TargetStatus::Unknown);
        assert_eq!(TargetStatus::from_db(None), TargetStatus::Unknown);
    }
}
