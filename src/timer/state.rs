use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// A focus timer shared between its owner and the live session broadcaster.
pub type SharedTimer = Arc<Mutex<FocusTimer>>;

/// Serializable view of a [`FocusTimer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusTimerState {
    pub title: String,
    pub total_ms: u64,
    pub remaining_ms: u64,
    pub running: bool,
    pub ends_at: DateTime<Utc>,
}

/// Countdown for one focus interval. Lives only in the primary process.
///
/// While running, remaining time is derived from a monotonic anchor and never
/// increases. Once it reaches zero the timer is no longer running; `sync`
/// makes that transition stick.
#[derive(Debug, Clone)]
pub struct FocusTimer {
    title: String,
    total: Duration,
    /// Remaining time as of `running_anchor`, or the frozen value when paused.
    remaining_baseline: Duration,
    running_anchor: Option<Instant>,
    /// Wall-clock end, fixed for the current running window.
    ends_at: Option<DateTime<Utc>>,
}

impl FocusTimer {
    pub fn new(title: impl Into<String>, total: Duration) -> Self {
        Self {
            title: title.into(),
            total,
            remaining_baseline: total,
            running_anchor: None,
            ends_at: None,
        }
    }

    /// New timer that is already counting down.
    pub fn started(title: impl Into<String>, total: Duration) -> Self {
        let mut timer = Self::new(title, total);
        timer.resume();
        timer
    }

    pub fn shared(self) -> SharedTimer {
        Arc::new(Mutex::new(self))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn remaining(&self) -> Duration {
        match self.running_anchor {
            Some(anchor) => self.remaining_baseline.saturating_sub(anchor.elapsed()),
            None => self.remaining_baseline,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_anchor.is_some() && !self.remaining().is_zero()
    }

    pub fn is_finished(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Wall-clock end of the interval if it keeps running from now.
    pub fn ends_at(&self) -> DateTime<Utc> {
        match self.ends_at {
            Some(ends_at) if self.running_anchor.is_some() => ends_at,
            _ => Utc::now() + to_chrono(self.remaining()),
        }
    }

    pub fn resume(&mut self) {
        if self.running_anchor.is_some() || self.remaining_baseline.is_zero() {
            return;
        }
        self.running_anchor = Some(Instant::now());
        self.ends_at = Some(Utc::now() + to_chrono(self.remaining_baseline));
    }

    pub fn pause(&mut self) {
        self.remaining_baseline = self.remaining();
        self.running_anchor = None;
        self.ends_at = None;
    }

    /// Folds elapsed time into the baseline and stops the timer at zero.
    pub fn sync(&mut self) {
        if self.running_anchor.is_some() && self.remaining().is_zero() {
            self.remaining_baseline = Duration::ZERO;
            self.running_anchor = None;
            self.ends_at = None;
        }
    }

    pub fn state(&self) -> FocusTimerState {
        FocusTimerState {
            title: self.title.clone(),
            total_ms: self.total.as_millis() as u64,
            remaining_ms: self.remaining().as_millis() as u64,
            running: self.is_running(),
            ends_at: self.ends_at(),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
