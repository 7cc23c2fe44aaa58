use log::info;
use uuid::Uuid;

use super::{LiveContent, LiveUpdate};
use crate::error::CoreResult;

/// How quickly the surface should remove an ended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissalPolicy {
    /// Leave the final state up for the host's usual grace period.
    Default,
    /// Remove right away, used when a new session replaces the old one.
    Immediate,
}

/// The OS-level display that shows a live session outside any app window.
/// Every call may be rejected, for example when the host's update budget is
/// spent; rejections come back as `CoreError::SessionRejected`.
pub trait LiveSurface: Send + Sync {
    /// Whether the host currently allows live sessions at all.
    fn is_enabled(&self) -> bool;

    fn request(&self, session_id: Uuid, content: &LiveContent) -> CoreResult<()>;

    fn update(&self, session_id: Uuid, update: &LiveUpdate) -> CoreResult<()>;

    fn end(&self, session_id: Uuid, update: &LiveUpdate, dismissal: DismissalPolicy)
        -> CoreResult<()>;
}

/// Surface for hosts without a live display: every call lands in the log.
pub struct LogSurface {
    enabled: bool,
}

impl LogSurface {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl LiveSurface for LogSurface {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn request(&self, session_id: Uuid, content: &LiveContent) -> CoreResult<()> {
        info!(
            "live session {session_id} started: {} ({}s of {}s)",
            content.title,
            content.remaining_ms / 1000,
            content.total_ms / 1000
        );
        Ok(())
    }

    fn update(&self, session_id: Uuid, update: &LiveUpdate) -> CoreResult<()> {
        let content = &update.content;
        info!(
            "live session {session_id}: {} {:02}:{:02}{}",
            content.title,
            content.remaining_ms / 60_000,
            (content.remaining_ms / 1000) % 60,
            if content.running { "" } else { " (paused)" }
        );
        Ok(())
    }

    fn end(
        &self,
        session_id: Uuid,
        update: &LiveUpdate,
        dismissal: DismissalPolicy,
    ) -> CoreResult<()> {
        info!(
            "live session {session_id} ended ({dismissal:?}), stale at {:?}",
            update.stale_at
        );
        Ok(())
    }
}
