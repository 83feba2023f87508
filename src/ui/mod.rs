use crate::models::*;
use crate::services::{usage_tracker::UsageTracker, KeyValueStore};
use colored::*;
use std::time::Duration;

/// Everything the status panel shows, captured from a tracker at one instant
#[derive(Debug, Clone)]
pub struct StatusView {
    pub record: UsageRecord,
    pub remaining: RemainingMessages,
    pub warning: bool,
    pub daily_limit: u32,
    pub health: PersistenceHealth,
    pub until_reset: Duration,
}

impl StatusView {
    pub fn capture<S: KeyValueStore>(tracker: &UsageTracker<S>, until_reset: Duration) -> Self {
        Self {
            record: tracker.snapshot(),
            remaining: tracker.remaining_messages(),
            warning: tracker.should_warn(),
            daily_limit: tracker.config().daily_free_limit,
            health: tracker.persistence_health(),
            until_reset,
        }
    }
}

/// Render the usage panel printed by `status` and after each command
pub fn render_status(view: &StatusView) -> String {
    let mut lines = Vec::new();
    let record = &view.record;

    lines.push(format!("{}", "📊 Usage Status".bright_cyan().bold()));

    let plan = if record.is_premium {
        "Premium 👑".bright_yellow().bold()
    } else {
        "Free".normal()
    };
    lines.push(format!("  Plan: {plan}"));

    let remaining = match view.remaining {
        RemainingMessages::Unlimited => view.remaining.to_string().bright_green(),
        _ if view.warning => view.remaining.to_string().bright_red(),
        _ => view.remaining.to_string().bright_green(),
    };
    lines.push(format!("  Messages left: {remaining}"));

    lines.push(format!(
        "  Today: {} {}/{}",
        create_progress_bar(record.daily_message_count, view.daily_limit, 20),
        record.daily_message_count,
        view.daily_limit
    ));
    lines.push(format!("  Tokens: {}", record.token_balance));
    lines.push(format!(
        "  Resets in: {} (last reset {})",
        format_countdown(view.until_reset),
        record.last_reset_date
    ));

    if view.warning {
        lines.push(format!(
            "  {}",
            "⚠️ Running low on messages. Upgrade or buy tokens to keep chatting.".yellow()
        ));
    }

    if let Some(error) = &view.health.last_error {
        lines.push(format!("  {} {}", "❌ Not saved:".red(), error));
    } else if view.health.pending {
        lines.push(format!("  {}", "⏳ Saving...".dimmed()));
    }

    lines.join("\n")
}

/// Simple progress bar utility
pub fn create_progress_bar(current: u32, total: u32, width: usize) -> String {
    let ratio = if total == 0 {
        1.0
    } else {
        (current as f64 / total as f64).min(1.0)
    };
    let filled = (ratio * width as f64).round() as usize;
    let empty = width - filled;

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Countdown rounded to whole minutes
pub fn format_countdown(duration: Duration) -> String {
    let minutes = Duration::from_secs(duration.as_secs() / 60 * 60);
    if minutes.is_zero() {
        return "under a minute".to_string();
    }
    humantime::format_duration(minutes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn view(record: UsageRecord, remaining: RemainingMessages, warning: bool) -> StatusView {
        StatusView {
            record,
            remaining,
            warning,
            daily_limit: DAILY_FREE_LIMIT,
            health: PersistenceHealth::default(),
            until_reset: Duration::from_secs(3 * 3600 + 20 * 60 + 15),
        }
    }

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(create_progress_bar(0, 10, 4), "[░░░░]");
        assert_eq!(create_progress_bar(5, 10, 4), "[██░░]");
        assert_eq!(create_progress_bar(15, 10, 4), "[████]");
        assert_eq!(create_progress_bar(0, 0, 4), "[████]");
    }

    #[test]
    fn test_countdown_drops_seconds() {
        assert_eq!(format_countdown(Duration::from_secs(3 * 3600 + 20 * 60 + 15)), "3h 20m");
        assert_eq!(format_countdown(Duration::from_secs(42)), "under a minute");
    }

    #[test]
    fn test_render_status_free_user_with_warning() {
        let mut record = UsageRecord::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        record.daily_message_count = 8;
        let output = render_status(&view(record, RemainingMessages::Free(2), true));

        assert!(output.contains("Free"));
        assert!(output.contains("8/10"));
        assert!(output.contains("Running low on messages"));
        assert!(output.contains("2026-10-17"));
        assert!(output.contains("3h 20m"));
    }

    #[test]
    fn test_render_status_shows_write_failure() {
        let mut record = UsageRecord::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        record.is_premium = true;
        let mut view = view(record, RemainingMessages::Unlimited, false);
        view.health = PersistenceHealth {
            pending: true,
            last_error: Some("disk full".to_string()),
        };
        let output = render_status(&view);

        assert!(output.contains("Premium"));
        assert!(output.contains("Unlimited"));
        assert!(output.contains("disk full"));
        assert!(!output.contains("Running low"));
    }
}
