//! Rolling availability over the most recent checks of a target.

use crate::db::{CheckRecord, CheckStatus};

/// Short rolling window, in checks.
pub const SHORT_WINDOW: usize = 5;
/// Long rolling window, in checks.
pub const LONG_WINDOW: usize = 60;

/// Percentage of `up` checks among the newest `window` records.
///
/// `records` must be ordered newest first. A history shorter than the
/// window is averaged over what exists. With nothing to average the
/// result is `None`: no history is not the same as full availability.
pub fn window_stats(records: &[CheckRecord], window: usize) -> Option<u8> {
    let considered = &records[..records.len().min(window)];
    if considered.is_empty() {
        return None;
    }

    let total = considered.len() as u64;
    let up = considered
        .iter()
        .filter(|r| r.status == CheckStatus::Up)
        .count() as u64;

    // round(100 * up / total), halves away from zero
    Some(((200 * up + total) / (2 * total)) as u8)
}

/// Both rolling windows for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    pub last5: Option<u8>,
    pub last60: Option<u8>,
}

impl Availability {
    /// `records` newest first, at least `LONG_WINDOW` long when that much history exists.
    pub fn from_records(records: &[CheckRecord]) -> Self {
        Self {
            last5: window_stats(records, SHORT_WINDOW),
            last60: window_stats(records, LONG_WINDOW),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    /// Build records newest first from a pattern of statuses, newest first too.
    fn records(pattern: &[bool]) -> Vec<CheckRecord> {
        let now = Utc::now();
        pattern
            .iter()
            .enumerate()
            .map(|(i, &up)| CheckRecord {
                id: (pattern.len() - i) as i64,
                target_id: 1,
                time: now - ChronoDuration::seconds(i as i64),
                status: if up { CheckStatus::Up } else { CheckStatus::Down },
                ping_ms: up.then_some(1.0),
            })
            .collect()
    }

    #[test]
    fn test_empty_history_is_unknown() {
        assert_eq!(window_stats(&[], SHORT_WINDOW), None);
        assert_eq!(Availability::from_records(&[]), Availability::default());
    }

    #[test]
    fn test_partial_window_two_of_three() {
        let history = records(&[true, false, true]);
        assert_eq!(window_stats(&history, SHORT_WINDOW), Some(67));
        assert_eq!(window_stats(&history, LONG_WINDOW), Some(67));
    }

    #[test]
    fn test_long_window_ignores_older_checks() {
        // 54 of the newest 60 are up; the 20 older ones are all down.
        let mut pattern = vec![true; 54];
        pattern.extend([false; 6]);
        pattern.extend([false; 20]);
        let history = records(&pattern);

        assert_eq!(window_stats(&history, LONG_WINDOW), Some(90));
        assert_eq!(window_stats(&history, SHORT_WINDOW), Some(100));
    }

    #[test]
    fn test_short_window_uses_newest_records() {
        let history = records(&[false, false, true, true, true, true, true]);
        assert_eq!(window_stats(&history, SHORT_WINDOW), Some(60));
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        // 1 of 8 up is 12.5%
        let mut pattern = vec![true];
        pattern.extend([false; 7]);
        assert_eq!(window_stats(&records(&pattern), LONG_WINDOW), Some(13));

        // 1 of 3 up is 33.3%
        assert_eq!(window_stats(&records(&[true, false, false]), SHORT_WINDOW), Some(33));
    }

    #[test]
    fn test_all_down_is_zero() {
        assert_eq!(window_stats(&records(&[false; 4]), SHORT_WINDOW), Some(0));
    }
}
