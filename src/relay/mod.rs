//! Forwards store and session changes to the companion device.
//!
//! The relay listens on the in-process [`ChangeBus`], turns each event into a
//! small JSON summary and hands it to a non-blocking transport. A summary the
//! transport refuses is dropped; nothing is retried. Session-start signals are
//! also marshalled onto the [`MainContext`] before they touch the
//! [`CompanionView`].

mod transport;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use transport::{ChannelTransport, CompanionTransport};

use crate::events::{ChangeBus, ChangeEvent};
use crate::main_context::MainContext;
use crate::snapshot::{SnapshotProjection, TaskFilter};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Wire format shipped to the companion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelaySummary {
    Tasks {
        open: usize,
        completed: usize,
        due_today: usize,
    },
    Categories {
        count: usize,
    },
    SessionStarted {
        session_id: Uuid,
        title: String,
        ends_at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: Uuid,
    },
}

/// UI-adjacent relay state. Only mutated on the main context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanionView {
    pub announced_session: Option<(Uuid, String)>,
    pub last_forwarded: Option<RelaySummary>,
    pub forwarded: u64,
    pub dropped: u64,
}

type SharedView = Arc<Mutex<CompanionView>>;

struct RelayWorker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct CompanionRelay {
    bus: ChangeBus,
    projection: SnapshotProjection,
    transport: Arc<dyn CompanionTransport>,
    main: MainContext,
    view: SharedView,
    worker: Mutex<Option<RelayWorker>>,
}

impl CompanionRelay {
    pub fn new(
        bus: ChangeBus,
        projection: SnapshotProjection,
        transport: Arc<dyn CompanionTransport>,
        main: MainContext,
    ) -> Self {
        Self {
            bus,
            projection,
            transport,
            main,
            view: Arc::new(Mutex::new(CompanionView::default())),
            worker: Mutex::new(None),
        }
    }

    /// Begins forwarding. Calling it again while running does nothing and
    /// returns false.
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay_loop(
            self.bus.subscribe(),
            self.projection.clone(),
            self.transport.clone(),
            self.main.clone(),
            self.view.clone(),
            cancel.clone(),
        ));
        *worker = Some(RelayWorker { handle, cancel });
        log_info!("Companion relay started");
        true
    }

    /// Stops forwarding after flushing changes already on the bus.
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(err) = worker.handle.await {
                log_error!("Companion relay task failed: {err}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Reads the view from the main context, after any queued updates.
    pub async fn view(&self) -> CompanionView {
        let view = self.view.clone();
        match self.main.run(move || lock(&view).clone()).await {
            Ok(snapshot) => snapshot,
            Err(_) => lock(&self.view).clone(),
        }
    }
}

async fn relay_loop(
    mut events: broadcast::Receiver<ChangeEvent>,
    projection: SnapshotProjection,
    transport: Arc<dyn CompanionTransport>,
    main: MainContext,
    view: SharedView,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(event) => forward(&event, &projection, transport.as_ref(), &main, &view).await,
            Err(RecvError::Lagged(skipped)) => {
                log_warn!("Companion relay fell behind; {skipped} change(s) skipped");
            }
            Err(RecvError::Closed) => {
                log_info!("Companion relay stopped");
                return;
            }
        }
    }

    // Changes published before the stop request still go out.
    let mut drained = 0;
    loop {
        match events.try_recv() {
            Ok(event) => {
                forward(&event, &projection, transport.as_ref(), &main, &view).await;
                drained += 1;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                log_warn!("Companion relay fell behind; {skipped} change(s) skipped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    log_info!("Companion relay stopped ({drained} change(s) flushed)");
}

async fn forward(
    event: &ChangeEvent,
    projection: &SnapshotProjection,
    transport: &dyn CompanionTransport,
    main: &MainContext,
    view: &SharedView,
) {
    match event {
        ChangeEvent::SessionStarted {
            session_id, title, ..
        } => {
            let view = view.clone();
            let announced = (*session_id, title.clone());
            main.post(move || lock(&view).announced_session = Some(announced));
        }
        ChangeEvent::SessionEnded { session_id } => {
            let view = view.clone();
            let ended = *session_id;
            main.post(move || {
                let mut view = lock(&view);
                if view.announced_session.as_ref().map(|(id, _)| *id) == Some(ended) {
                    view.announced_session = None;
                }
            });
        }
        ChangeEvent::TasksChanged | ChangeEvent::CategoriesChanged => {}
    }

    let summary = summarize(event, projection).await;
    let delivered = match serde_json::to_vec(&summary) {
        Ok(payload) => match transport.try_deliver(payload) {
            Ok(()) => Some(summary),
            Err(err) => {
                log_warn!("{err}; dropping {summary:?}");
                None
            }
        },
        Err(err) => {
            log_error!("Failed to encode relay summary: {err}");
            None
        }
    };

    let view = view.clone();
    main.post(move || {
        let mut view = lock(&view);
        match delivered {
            Some(summary) => {
                view.forwarded += 1;
                view.last_forwarded = Some(summary);
            }
            None => view.dropped += 1,
        }
    });
}

async fn summarize(event: &ChangeEvent, projection: &SnapshotProjection) -> RelaySummary {
    match event {
        ChangeEvent::TasksChanged => {
            let tasks = projection.snapshot_tasks().await;
            let now = Local::now();
            let completed = tasks.iter().filter(|task| task.completed).count();
            let due_today = tasks
                .iter()
                .filter(|task| !task.completed && TaskFilter::Today.matches(task.due_at, &now))
                .count();
            RelaySummary::Tasks {
                open: tasks.len() - completed,
                completed,
                due_today,
            }
        }
        ChangeEvent::CategoriesChanged => RelaySummary::Categories {
            count: projection.snapshot_categories().await.len(),
        },
        ChangeEvent::SessionStarted {
            session_id,
            title,
            ends_at,
        } => RelaySummary::SessionStarted {
            session_id: *session_id,
            title: title.clone(),
            ends_at: *ends_at,
        },
        ChangeEvent::SessionEnded { session_id } => RelaySummary::SessionEnded {
            session_id: *session_id,
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
