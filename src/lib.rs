pub mod db;
pub mod error;
pub mod events;
pub mod live;
pub mod main_context;
pub mod migration;
pub mod relay;
pub mod settings;
pub mod snapshot;
pub mod timer;
mod utils;

use std::{path::Path, sync::Arc};

use log::{info, warn, LevelFilter};
use tokio::sync::mpsc;

use db::{AccessMode, Database, StoreScope};
use error::{CoreError, CoreResult};
use events::ChangeBus;
use live::{LiveSessionBroadcaster, LogSurface};
use main_context::MainContext;
use migration::{GateOutcome, MigrationGate};
use relay::{ChannelTransport, CompanionRelay};
use settings::SettingsStore;
use snapshot::SnapshotProjection;
use timer::FocusController;

/// Build identifier the Migration Gate is keyed on.
pub const BUILD_NUMBER: &str = "1";

/// Installs the global logger. `RUST_LOG` still wins for module directives;
/// `FOCUSLINK_DEBUG=1` lowers the default level to debug.
pub fn init_logging() {
    let level = if std::env::var("FOCUSLINK_DEBUG").is_ok_and(|value| value == "1") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // A second init (tests, embedding hosts) keeps the first logger.
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

/// Opens the shared store the way a widget or intent handler does.
pub fn open_reader(container: &Path) -> CoreResult<SnapshotProjection> {
    let db = Database::open(StoreScope::durable(container), AccessMode::ReadOnly)?;
    Ok(SnapshotProjection::new(db))
}

/// Everything the primary process owns once it has launched.
pub struct PrimaryApp {
    pub db: Database,
    pub settings: SettingsStore,
    pub bus: ChangeBus,
    pub projection: SnapshotProjection,
    pub focus: FocusController,
    pub relay: CompanionRelay,
    pub main: MainContext,
    migration: Option<GateOutcome>,
    companion_inbox: Option<mpsc::Receiver<Vec<u8>>>,
}

impl PrimaryApp {
    /// Opens the store read-write, runs the Migration Gate for `build` and
    /// wires the focus controller, broadcaster and relay together. An
    /// incomplete migration is logged and retried on the next boot.
    pub async fn boot(container: &Path, build: &str) -> CoreResult<Self> {
        info!("FocusLink starting up (build {build})...");

        let bus = ChangeBus::new();
        let db = Database::open(StoreScope::durable(container), AccessMode::ReadWrite)?
            .with_change_bus(bus.clone());
        let settings =
            SettingsStore::in_container(container).map_err(CoreError::StoreUnavailable)?;

        let migration = match MigrationGate::new(&settings).run(&db, build).await {
            Ok(outcome) => {
                info!("Migration gate for build {build}: {outcome:?}");
                Some(outcome)
            }
            Err(err) => {
                warn!("{err}");
                None
            }
        };

        let (main, _) = MainContext::spawn();
        let projection = SnapshotProjection::new(db.clone());
        let surface = Arc::new(LogSurface::new(settings.live_sessions_enabled()));
        let broadcaster = LiveSessionBroadcaster::new(surface, main.clone());
        let focus = FocusController::new(
            broadcaster,
            projection.clone(),
            settings.default_focus_minutes(),
        )
        .with_change_bus(bus.clone());

        let (transport, companion_inbox) =
            ChannelTransport::bounded(settings.relay_queue_capacity());
        let relay = CompanionRelay::new(
            bus.clone(),
            projection.clone(),
            Arc::new(transport),
            main.clone(),
        );

        Ok(Self {
            db,
            settings,
            bus,
            projection,
            focus,
            relay,
            main,
            migration,
            companion_inbox: Some(companion_inbox),
        })
    }

    /// What the gate did during boot; `None` when it did not finish.
    pub fn migration(&self) -> Option<GateOutcome> {
        self.migration
    }

    /// The receiving end of the companion queue. Available once.
    pub fn take_companion_inbox(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.companion_inbox.take()
    }

    /// Stops any running focus interval, then the relay. The relay flushes
    /// the resulting session-ended change before it exits.
    pub async fn shutdown(&self) {
        if self.focus.state().await.is_some() {
            if let Err(err) = self.focus.stop().await {
                warn!("Failed to stop focus interval: {err:#}");
            }
        }
        self.relay.stop().await;
        info!("FocusLink shut down");
    }
}
