use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::info;
use tokio::{
    sync::Mutex,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    events::{ChangeBus, ChangeEvent},
    live::{LiveSessionBroadcaster, TICK_INTERVAL},
    snapshot::SnapshotProjection,
};

use super::{FocusTimer, FocusTimerState, SharedTimer};

const MAX_FOCUS: Duration = Duration::from_secs(24 * 60 * 60);

struct FocusSession {
    id: Uuid,
    timer: SharedTimer,
    watch: CancellationToken,
}

type CurrentSession = Arc<Mutex<Option<FocusSession>>>;

/// Owns the primary process's focus timer, keeps the live session in step
/// with it and announces each session's start and end on the change bus.
/// The announcements happen whether or not the host shows a live display.
#[derive(Clone)]
pub struct FocusController {
    current: CurrentSession,
    broadcaster: LiveSessionBroadcaster,
    projection: SnapshotProjection,
    default_minutes: u32,
    changes: Option<ChangeBus>,
}

impl FocusController {
    pub fn new(
        broadcaster: LiveSessionBroadcaster,
        projection: SnapshotProjection,
        default_minutes: u32,
    ) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            broadcaster,
            projection,
            default_minutes: default_minutes.max(1),
            changes: None,
        }
    }

    pub fn with_change_bus(mut self, bus: ChangeBus) -> Self {
        self.changes = Some(bus);
        self
    }

    pub fn broadcaster(&self) -> &LiveSessionBroadcaster {
        &self.broadcaster
    }

    /// The running interval, or `None` once it was stopped or ran out.
    pub async fn state(&self) -> Option<FocusTimerState> {
        let timer = self.current.lock().await.as_ref()?.timer.clone();
        let mut timer = timer.lock().await;
        timer.sync();
        Some(timer.state())
    }

    /// Starts a new focus interval, replacing any running one, and returns
    /// its session id. The live display shows the same id when enabled.
    pub async fn start_focus(&self, title: &str, duration: Duration) -> Result<Uuid> {
        if duration.is_zero() {
            bail!("focus duration must be greater than zero");
        }
        if duration > MAX_FOCUS {
            bail!("focus duration must not exceed 24 hours");
        }

        let timer = FocusTimer::started(title, duration).shared();
        let ends_at = timer.lock().await.ends_at();
        let id = Uuid::new_v4();

        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.watch.cancel();
            publish(
                self.changes.as_ref(),
                ChangeEvent::SessionEnded {
                    session_id: previous.id,
                },
            );
        }

        let shown = self.broadcaster.start(id, timer.clone()).await;

        let watch = CancellationToken::new();
        tokio::spawn(watch_for_finish(
            id,
            timer.clone(),
            self.current.clone(),
            self.changes.clone(),
            watch.clone(),
        ));
        *current = Some(FocusSession { id, timer, watch });
        publish(
            self.changes.as_ref(),
            ChangeEvent::SessionStarted {
                session_id: id,
                title: title.to_string(),
                ends_at,
            },
        );

        info!(
            "Focus started: {title} for {}m{}",
            duration.as_secs().div_ceil(60),
            if shown { "" } else { " (no live display)" }
        );
        Ok(id)
    }

    /// Starts focusing on the task with `uid`, using its own focus length or
    /// the configured default.
    pub async fn start_focus_for_task(&self, uid: &str) -> Result<Uuid> {
        let task = self
            .projection
            .task_query()
            .entities_for(&[uid.to_string()])
            .await
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no task with identifier {uid}"))?;

        let minutes = task.focus_minutes.unwrap_or(self.default_minutes);
        self.start_focus(&task.name, Duration::from_secs(u64::from(minutes) * 60))
            .await
    }

    pub async fn pause(&self) -> Result<FocusTimerState> {
        let state = self.with_timer(|timer| timer.pause()).await?;
        self.broadcaster.refresh().await;
        Ok(state)
    }

    pub async fn resume(&self) -> Result<FocusTimerState> {
        let state = self.with_timer(|timer| timer.resume()).await?;
        self.broadcaster.refresh().await;
        Ok(state)
    }

    /// Stops the current interval and ends its live session.
    pub async fn stop(&self) -> Result<FocusTimerState> {
        let session = self
            .current
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("no focus interval to stop"))?;
        session.watch.cancel();
        let state = {
            let mut timer = session.timer.lock().await;
            timer.pause();
            timer.state()
        };
        self.broadcaster.end().await;
        publish(
            self.changes.as_ref(),
            ChangeEvent::SessionEnded {
                session_id: session.id,
            },
        );
        Ok(state)
    }

    async fn with_timer(&self, change: impl FnOnce(&mut FocusTimer)) -> Result<FocusTimerState> {
        let timer = self
            .current
            .lock()
            .await
            .as_ref()
            .map(|session| session.timer.clone())
            .ok_or_else(|| anyhow!("no focus interval in progress"))?;
        let mut timer = timer.lock().await;
        timer.sync();
        change(&mut *timer);
        Ok(timer.state())
    }
}

/// Clears the session and announces its end once the timer runs out. Runs
/// independently of the live display, which may not exist.
async fn watch_for_finish(
    id: Uuid,
    timer: SharedTimer,
    current: CurrentSession,
    changes: Option<ChangeBus>,
    watch: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = watch.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut current = current.lock().await;
        if watch.is_cancelled() || current.as_ref().map(|session| session.id) != Some(id) {
            break;
        }
        let finished = {
            let mut timer = timer.lock().await;
            timer.sync();
            timer.is_finished()
        };
        if finished {
            current.take();
            publish(changes.as_ref(), ChangeEvent::SessionEnded { session_id: id });
            info!("Focus interval {id} finished");
            break;
        }
    }
}

fn publish(changes: Option<&ChangeBus>, event: ChangeEvent) {
    if let Some(bus) = changes {
        bus.publish(event);
    }
}
