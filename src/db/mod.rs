use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use migrations::CURRENT_SCHEMA_VERSION;
pub use models::{Category, CategoryColor, NewTask, Task, TaskUpdate};

use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeBus, ChangeEvent};
use migrations::{ensure_current_schema, run_migrations};

pub const STORE_FILE_NAME: &str = "focuslink.sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Where a handle's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreScope {
    /// The real shared container; every process opening the same container
    /// sees the same committed data.
    Durable { container: PathBuf },
    /// Private to this handle, discarded on drop. Tests and previews only.
    InMemory,
}

impl StoreScope {
    pub fn durable(container: impl Into<PathBuf>) -> Self {
        StoreScope::Durable {
            container: container.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Primary process: runs schema migrations and may write.
    ReadWrite,
    /// Widgets, intent handlers, companion: never writes, never migrates.
    ReadOnly,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// Process-local handle to the shared store.
///
/// All SQLite work for one handle runs on a dedicated worker thread; async
/// callers hand it closures and await the reply. Cloning shares the worker.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Option<Arc<PathBuf>>,
    mode: AccessMode,
    changes: Option<ChangeBus>,
}

/// Shorthand for the primary process: read-write handle on `scope`.
pub fn open_store(scope: StoreScope) -> CoreResult<Database> {
    Database::open(scope, AccessMode::ReadWrite)
}

impl Database {
    pub fn open(scope: StoreScope, mode: AccessMode) -> CoreResult<Self> {
        Self::open_inner(scope, mode).map_err(CoreError::StoreUnavailable)
    }

    fn open_inner(scope: StoreScope, mode: AccessMode) -> Result<Self> {
        let db_path = match &scope {
            StoreScope::Durable { container } => {
                if mode == AccessMode::ReadWrite {
                    std::fs::create_dir_all(container).with_context(|| {
                        format!("failed to create shared container {}", container.display())
                    })?;
                }
                let path = container.join(STORE_FILE_NAME);
                if mode == AccessMode::ReadOnly && !path.exists() {
                    bail!("store {} has not been created yet", path.display());
                }
                Some(path)
            }
            StoreScope::InMemory => None,
        };

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focuslink-store".into())
            .spawn(move || {
                let mut conn = match open_connection(path_for_thread.as_deref(), mode) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        match &db_path {
            Some(path) => info!("Store opened at {} ({:?})", path.display(), mode),
            None => info!("In-memory store opened ({:?})", mode),
        }

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: db_path.map(Arc::new),
            mode,
            changes: None,
        })
    }

    /// Announce committed writes on `bus`.
    pub fn with_change_bus(mut self, bus: ChangeBus) -> Self {
        self.changes = Some(bus);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref().map(PathBuf::as_path)
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.mode == AccessMode::ReadOnly {
            bail!("store handle is read-only");
        }
        Ok(())
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        if let Some(bus) = &self.changes {
            bus.publish(event);
        }
    }
}

fn open_connection(path: Option<&Path>, mode: AccessMode) -> Result<Connection> {
    let mut conn = match (path, mode) {
        (Some(path), AccessMode::ReadWrite) => {
            Connection::open(path).context("failed to open SQLite store")?
        }
        (Some(path), AccessMode::ReadOnly) => Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("failed to open SQLite store read-only")?,
        (None, _) => Connection::open_in_memory().context("failed to open in-memory store")?,
    };

    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    if path.is_some() && mode == AccessMode::ReadWrite {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }
    }
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        error!("Failed to enable foreign keys: {err}");
    }

    // An in-memory store has nobody else to migrate it.
    if mode == AccessMode::ReadWrite || path.is_none() {
        run_migrations(&mut conn).context("failed to run store migrations")?;
    } else {
        ensure_current_schema(&conn)?;
    }

    Ok(conn)
}
