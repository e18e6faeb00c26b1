//! Retention policy configuration.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// How many chains each retention bucket keeps, and where the calendar
/// windows begin.
///
/// Counts are consecutive recent slots: `daily_count = 7` keeps the
/// first chain of each of the last seven days. A count of zero disables
/// that bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Chains kept in the DAILY bucket.
    pub daily_count: u32,

    /// Chains kept in the WEEKLY bucket.
    pub weekly_count: u32,

    /// Chains kept in the MONTHLY bucket.
    pub monthly_count: u32,

    /// Chains kept in the YEARLY bucket.
    pub yearly_count: u32,

    /// First day of the scheduling week.
    pub week_start: Weekday,

    /// Day of year (1-366) where the yearly window rolls over. Day 366
    /// clamps to the last day of non-leap years.
    pub yearly_anchor_day: u16,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            daily_count: 7,
            weekly_count: 4,
            monthly_count: 6,
            yearly_count: 1,
            week_start: Weekday::Mon,
            yearly_anchor_day: 1,
        }
    }
}

impl RotationPolicy {
    /// Validates the policy, returning a description of the first
    /// problem found.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.daily_count == 0
            && self.weekly_count == 0
            && self.monthly_count == 0
            && self.yearly_count == 0
        {
            return Some("retention keeps nothing: every bucket count is zero".to_string());
        }
        if self.yearly_anchor_day == 0 || self.yearly_anchor_day > 366 {
            return Some(format!(
                "yearly_anchor_day must be 1-366, got {}",
                self.yearly_anchor_day
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_a_year_of_history() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.daily_count, 7);
        assert_eq!(policy.weekly_count, 4);
        assert_eq!(policy.monthly_count, 6);
        assert_eq!(policy.yearly_count, 1);
        assert_eq!(policy.week_start, Weekday::Mon);
        assert!(policy.validate().is_none());
    }

    #[test]
    fn validate_rejects_keep_nothing_and_bad_anchor_day() {
        let nothing = RotationPolicy {
            daily_count: 0,
            weekly_count: 0,
            monthly_count: 0,
            yearly_count: 0,
            ..RotationPolicy::default()
        };
        assert!(nothing.validate().is_some());

        let bad_day = RotationPolicy {
            yearly_anchor_day: 367,
            ..RotationPolicy::default()
        };
        assert!(bad_day.validate().is_some());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let policy: RotationPolicy = serde_json::from_str(
            r#"{ "weekly_count": 2, "week_start": "Sunday" }"#,
        )
        .expect("parse");
        assert_eq!(policy.weekly_count, 2);
        assert_eq!(policy.week_start, Weekday::Sun);
        assert_eq!(policy.daily_count, 7);

        // The weekday round-trips through its serialized form.
        let json = serde_json::to_string(&policy).expect("serialize");
        let back: RotationPolicy = serde_json::from_str(&json).expect("reparse");
        assert_eq!(back, policy);
    }
}
