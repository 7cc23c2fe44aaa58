use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::FocusTimer;

/// What the OS display surface renders for one live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveContent {
    pub title: String,
    pub remaining_ms: i64,
    pub total_ms: i64,
    pub running: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LiveContent {
    /// Derived from the live timer on every push; the broadcaster keeps no
    /// countdown of its own.
    pub fn from_timer(timer: &FocusTimer) -> Self {
        let total_ms = timer.total().as_millis() as i64;
        let end = timer.ends_at();
        Self {
            title: timer.title().to_string(),
            remaining_ms: timer.remaining().as_millis() as i64,
            total_ms,
            running: timer.is_running(),
            start: end - Duration::milliseconds(total_ms),
            end,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.remaining_ms <= 0
    }
}

/// A `(content, staleness marker)` pair as handed to the surface. The marker
/// is `None` while the session is active and a definite time once it ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    pub content: LiveContent,
    pub stale_at: Option<DateTime<Utc>>,
}
