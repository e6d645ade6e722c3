use chrono::{DateTime, Duration, Utc};

use crate::daemon::storage::settings::Settings;

/// Decides when to remind about a break. The first reminder comes one interval after the
/// tracker started.
pub struct BreakReminder {
    last_reminder: DateTime<Utc>,
}

impl BreakReminder {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            last_reminder: started_at,
        }
    }

    pub fn is_due(&mut self, settings: &Settings, now: DateTime<Utc>) -> bool {
        if !settings.break_reminder_enabled {
            return false;
        }
        let interval = Duration::minutes(i64::from(settings.break_reminder_interval_minutes.max(1)));
        if now - self.last_reminder < interval {
            return false;
        }
        self.last_reminder = now;
        true
    }
}
