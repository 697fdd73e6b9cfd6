//! The per-target view returned by sweeps and dashboard reads.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{CheckRecord, Target, TargetStatus};

use super::window::Availability;

/// A target's current status plus its rolling availability.
///
/// Percentages are `null` when the target has no check history yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProjection {
    pub id: i64,
    pub address: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub importance: Option<String>,
    pub remark: Option<String>,
    pub last_status: TargetStatus,
    pub last_ping_ms: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last5: Option<u8>,
    pub last60: Option<u8>,
}

impl TargetProjection {
    /// `recent` is the target's history, newest first.
    pub fn new(target: Target, recent: &[CheckRecord]) -> Self {
        let availability = Availability::from_records(recent);
        Self {
            id: target.id,
            address: target.address,
            name: target.name,
            device_type: target.device_type,
            importance: target.importance,
            remark: target.remark,
            last_status: target.last_status,
            last_ping_ms: target.last_ping_ms,
            last_checked: target.last_checked,
            last5: availability.last5,
            last60: availability.last60,
        }
    }
}
