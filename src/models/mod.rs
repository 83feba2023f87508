pub mod purchase;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use purchase::{Purchase, TokenPack};

/// Number of messages a free user may send per calendar day
pub const DAILY_FREE_LIMIT: u32 = 10;

/// Storage key holding the serialized usage record
pub const STORAGE_KEY: &str = "usage_data";

/// Persisted usage and entitlement state for one installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub daily_message_count: u32,
    pub last_reset_date: NaiveDate,
    pub is_premium: bool,
    pub token_balance: u32,
}

impl UsageRecord {
    /// Zero-valued record for a first run on `today`
    pub fn new(today: NaiveDate) -> Self {
        Self {
            daily_message_count: 0,
            last_reset_date: today,
            is_premium: false,
            token_balance: 0,
        }
    }

    /// Reset the daily counter if the record was last reset on another day.
    ///
    /// Returns true when a rollover happened. Only calendar-day equality is
    /// considered, so calling this twice on the same day is a no-op.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == today {
            return false;
        }
        self.daily_message_count = 0;
        self.last_reset_date = today;
        true
    }

    /// Free messages left today, ignoring tokens and premium
    pub fn free_remaining(&self, daily_limit: u32) -> u32 {
        daily_limit.saturating_sub(self.daily_message_count)
    }

    /// Fold `session` into this stored record. `session` started as a
    /// default record because this one could not be read, so its counts
    /// and balance are exactly what changed since.
    pub fn merge_session(mut self, session: &UsageRecord) -> Self {
        if self.last_reset_date != session.last_reset_date {
            self.daily_message_count = 0;
            self.last_reset_date = session.last_reset_date;
        }
        self.daily_message_count = self
            .daily_message_count
            .saturating_add(session.daily_message_count);
        self.token_balance = self.token_balance.saturating_add(session.token_balance);
        self.is_premium |= session.is_premium;
        self
    }
}

/// What the user has left to spend, as shown by the chat header and paywall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingMessages {
    Unlimited,
    Tokens(u32),
    Free(u32),
}

impl fmt::Display for RemainingMessages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemainingMessages::Unlimited => write!(f, "Unlimited"),
            RemainingMessages::Tokens(count) => write!(f, "{count} tokens"),
            RemainingMessages::Free(count) => write!(f, "{count}"),
        }
    }
}

/// Which entitlement paid for a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCharge {
    Premium,
    FreeQuota { remaining: u32 },
    Token { remaining: u32 },
}

/// How the usage record was obtained at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// A stored record was read back
    Restored,
    /// Nothing was stored yet
    Fresh,
    /// The stored record could not be read; defaults were used
    Recovered(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub source: LoadSource,
    pub rolled_over: bool,
}

/// State of the durable copy relative to memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceHealth {
    /// A mutation has not reached the store yet
    pub pending: bool,
    pub last_error: Option<String>,
}

/// Access tier of an AI model offered in the chat picker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Free,
    Premium,
}

/// Tracker configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub daily_free_limit: u32,
    /// Free messages left at or below which the upsell warning shows
    pub low_quota_threshold: u32,
    /// Token balance at or below which the upsell warning shows
    pub low_token_threshold: u32,
    pub storage_key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            daily_free_limit: DAILY_FREE_LIMIT,
            low_quota_threshold: 3,
            low_token_threshold: 5,
            storage_key: STORAGE_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_roll_over_only_on_new_day() {
        let mut record = UsageRecord {
            daily_message_count: 7,
            last_reset_date: day(2026, 3, 1),
            is_premium: false,
            token_balance: 4,
        };

        assert!(!record.roll_over(day(2026, 3, 1)));
        assert_eq!(record.daily_message_count, 7);

        assert!(record.roll_over(day(2026, 3, 2)));
        assert_eq!(record.daily_message_count, 0);
        assert_eq!(record.last_reset_date, day(2026, 3, 2));
        assert_eq!(record.token_balance, 4);

        assert!(!record.roll_over(day(2026, 3, 2)));
    }

    #[test]
    fn test_roll_over_when_clock_moves_backwards() {
        let mut record = UsageRecord::new(day(2026, 3, 5));
        record.daily_message_count = 3;

        assert!(record.roll_over(day(2026, 3, 4)));
        assert_eq!(record.daily_message_count, 0);
    }

    #[test]
    fn test_merge_session_adds_changes_to_stored_record() {
        let stored = UsageRecord {
            daily_message_count: 4,
            last_reset_date: day(2026, 3, 1),
            is_premium: true,
            token_balance: 100,
        };
        let mut session = UsageRecord::new(day(2026, 3, 1));
        session.daily_message_count = 2;
        session.token_balance = 5;

        let merged = stored.clone().merge_session(&session);
        assert_eq!(merged.daily_message_count, 6);
        assert_eq!(merged.token_balance, 105);
        assert!(merged.is_premium);

        // Counts from an older day do not carry into the session's day
        let mut next_day = UsageRecord::new(day(2026, 3, 2));
        next_day.daily_message_count = 1;
        let merged = stored.merge_session(&next_day);
        assert_eq!(merged.daily_message_count, 1);
        assert_eq!(merged.last_reset_date, day(2026, 3, 2));
    }

    #[test]
    fn test_free_remaining_is_clamped() {
        let mut record = UsageRecord::new(day(2026, 1, 1));
        record.daily_message_count = 12;
        assert_eq!(record.free_remaining(DAILY_FREE_LIMIT), 0);
        record.daily_message_count = 4;
        assert_eq!(record.free_remaining(DAILY_FREE_LIMIT), 6);
    }

    #[test]
    fn test_record_json_field_names() {
        let record = UsageRecord {
            daily_message_count: 2,
            last_reset_date: day(2026, 10, 17),
            is_premium: true,
            token_balance: 50,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "dailyMessageCount": 2,
                "lastResetDate": "2026-10-17",
                "isPremium": true,
                "tokenBalance": 50,
            })
        );
    }

    #[test]
    fn test_negative_counts_do_not_deserialize() {
        let raw = r#"{"dailyMessageCount":-1,"lastResetDate":"2026-10-17","isPremium":false,"tokenBalance":0}"#;
        assert!(serde_json::from_str::<UsageRecord>(raw).is_err());
    }

    #[test]
    fn test_remaining_messages_display() {
        assert_eq!(RemainingMessages::Unlimited.to_string(), "Unlimited");
        assert_eq!(RemainingMessages::Tokens(12).to_string(), "12 tokens");
        assert_eq!(RemainingMessages::Free(3).to_string(), "3");
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: TrackerConfig = serde_json::from_str(r#"{"daily_free_limit": 20}"#).unwrap();
        assert_eq!(config.daily_free_limit, 20);
        assert_eq!(config.low_quota_threshold, 3);
        assert_eq!(config.low_token_threshold, 5);
        assert_eq!(config.storage_key, "usage_data");
    }
}
