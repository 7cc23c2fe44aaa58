use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{DismissalPolicy, LiveContent, LiveSurface, LiveUpdate};
use crate::main_context::MainContext;
use crate::timer::SharedTimer;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Externally observable state of the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcasterPhase {
    Idle,
    Active { session_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Requested,
    Superseded,
    Finished,
}

struct ActiveSession {
    id: Uuid,
    timer: SharedTimer,
    cancel: CancellationToken,
    ticker: Option<JoinHandle<()>>,
    last: LiveContent,
}

type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

/// Mirrors one focus timer into the OS live display.
///
/// At most one session exists. The ticker only keeps time: each tick posts
/// the derive-and-push step onto the [`MainContext`], and that step re-checks
/// cancellation with the session slot locked. Once `end` has taken the
/// session, a step that was already queued finds it gone and pushes nothing.
/// A timer at zero ends the session from inside the step.
#[derive(Clone)]
pub struct LiveSessionBroadcaster {
    surface: Arc<dyn LiveSurface>,
    main: MainContext,
    slot: SessionSlot,
    tick_interval: Duration,
}

impl LiveSessionBroadcaster {
    pub fn new(surface: Arc<dyn LiveSurface>, main: MainContext) -> Self {
        Self {
            surface,
            main,
            slot: Arc::new(Mutex::new(None)),
            tick_interval: TICK_INTERVAL,
        }
    }

    pub async fn phase(&self) -> BroadcasterPhase {
        match self.slot.lock().await.as_ref() {
            Some(session) => BroadcasterPhase::Active {
                session_id: session.id,
            },
            None => BroadcasterPhase::Idle,
        }
    }

    /// Shows `timer` as live session `session_id`, retiring any session that
    /// is still up. Returns false when the host has live sessions disabled.
    pub async fn start(&self, session_id: Uuid, timer: SharedTimer) -> bool {
        let mut slot = self.slot.lock().await;

        if let Some(previous) = slot.take() {
            retire(
                previous,
                self.surface.as_ref(),
                EndReason::Superseded,
                DismissalPolicy::Immediate,
            )
            .await;
        }

        if !self.surface.is_enabled() {
            log_info!("Live sessions are disabled on this host; not showing {session_id}");
            return false;
        }

        let content = {
            let mut guard = timer.lock().await;
            guard.sync();
            LiveContent::from_timer(&guard)
        };

        if let Err(err) = self.surface.request(session_id, &content) {
            log_warn!("{err}; keeping session {session_id} locally");
        }

        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(tick_loop(
            session_id,
            self.slot.clone(),
            self.surface.clone(),
            self.main.clone(),
            cancel.clone(),
            self.tick_interval,
        ));

        *slot = Some(ActiveSession {
            id: session_id,
            timer,
            cancel,
            ticker: Some(ticker),
            last: content,
        });

        log_info!("Live session {session_id} active");
        true
    }

    /// Ends the current session, if any, leaving its final state up briefly.
    pub async fn end(&self) {
        self.end_with(DismissalPolicy::Default).await;
    }

    pub async fn end_with(&self, dismissal: DismissalPolicy) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            retire(
                session,
                self.surface.as_ref(),
                EndReason::Requested,
                dismissal,
            )
            .await;
        }
    }

    /// Pushes the timer's current state now instead of waiting for the next
    /// tick, e.g. right after a pause or resume.
    pub async fn refresh(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_mut() {
            push_update(session, self.surface.as_ref()).await;
        }
    }
}

async fn tick_loop(
    id: Uuid,
    slot: SessionSlot,
    surface: Arc<dyn LiveSurface>,
    main: MainContext,
    cancel: CancellationToken,
    tick_interval: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let step = tick_step(id, slot.clone(), surface.clone(), cancel.clone());
        match main.run_async(step).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                log_warn!("{err}; session {id} stops ticking");
                break;
            }
        }
    }
}

/// One tick, run on the main context. Returns whether to keep ticking.
async fn tick_step(
    id: Uuid,
    slot: SessionSlot,
    surface: Arc<dyn LiveSurface>,
    cancel: CancellationToken,
) -> bool {
    let mut guard = slot.lock().await;
    if cancel.is_cancelled() {
        return false;
    }
    let Some(session) = guard.as_mut().filter(|session| session.id == id) else {
        return false;
    };

    if !push_update(session, surface.as_ref()).await {
        return true;
    }

    if let Some(mut session) = guard.take() {
        // The ticker stops on our return value.
        session.ticker = None;
        retire(
            session,
            surface.as_ref(),
            EndReason::Finished,
            DismissalPolicy::Default,
        )
        .await;
    }
    false
}

/// Re-derives content and pushes it when the timer is running or its running
/// state changed. Returns whether the timer has reached zero.
async fn push_update(session: &mut ActiveSession, surface: &dyn LiveSurface) -> bool {
    let content = {
        let mut timer = session.timer.lock().await;
        timer.sync();
        LiveContent::from_timer(&timer)
    };

    if content.is_finished() {
        return true;
    }

    if content.running || content.running != session.last.running {
        let update = LiveUpdate {
            content: content.clone(),
            stale_at: None,
        };
        match surface.update(session.id, &update) {
            Ok(()) => log_debug!("Session {}: {}ms left", session.id, content.remaining_ms),
            Err(err) => log_warn!("{err}; retrying on next tick"),
        }
        session.last = content;
    }
    false
}

async fn retire(
    mut session: ActiveSession,
    surface: &dyn LiveSurface,
    reason: EndReason,
    dismissal: DismissalPolicy,
) {
    session.cancel.cancel();
    if let Some(ticker) = session.ticker.take() {
        ticker.abort();
    }

    let content = {
        let mut timer = session.timer.lock().await;
        timer.sync();
        let mut content = LiveContent::from_timer(&timer);
        content.running = false;
        content
    };
    let update = LiveUpdate {
        content,
        stale_at: Some(Utc::now()),
    };

    if let Err(err) = surface.end(session.id, &update, dismissal) {
        log_warn!("{err}; session {} cleared locally", session.id);
    }

    log_info!("Live session {} ended ({reason:?})", session.id);
}
