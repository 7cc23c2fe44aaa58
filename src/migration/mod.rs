//! Build-keyed one-time data repair.
//!
//! Each build identifier is either `Pending` or `Done`. A run at or above
//! [`MINIMUM_REPAIR_BUILD`] that finds its build `Pending` assigns a fresh uid
//! to every task lacking one, commits that as a single transaction, and only
//! then records `Done`. Any failure leaves the build `Pending`; the whole pass
//! runs again on the next launch, which is harmless because tasks that already
//! carry a uid are never touched.

use anyhow::Result;
use log::{info, warn};

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::settings::SettingsStore;

/// First build that shipped stable task identifiers.
pub const MINIMUM_REPAIR_BUILD: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Build is below the threshold or not a build number; nothing ran.
    Skipped,
    /// Build already marked done; tasks were not scanned.
    AlreadyDone,
    Repaired { patched: usize },
}

/// Where `Done` flags live. Written only after a successful flush.
pub trait MigrationLedger: Send + Sync {
    fn is_done(&self, build: &str) -> bool;
    fn mark_done(&self, build: &str) -> Result<()>;
}

impl MigrationLedger for SettingsStore {
    fn is_done(&self, build: &str) -> bool {
        self.migration_done(build)
    }

    fn mark_done(&self, build: &str) -> Result<()> {
        self.mark_migration_done(build)
    }
}

pub struct MigrationGate<'a> {
    ledger: &'a dyn MigrationLedger,
    minimum_build: u64,
}

impl<'a> MigrationGate<'a> {
    pub fn new(ledger: &'a dyn MigrationLedger) -> Self {
        Self {
            ledger,
            minimum_build: MINIMUM_REPAIR_BUILD,
        }
    }

    pub fn with_minimum_build(mut self, minimum_build: u64) -> Self {
        self.minimum_build = minimum_build;
        self
    }

    pub fn state(&self, build: &str) -> MigrationState {
        if self.ledger.is_done(build) {
            MigrationState::Done
        } else {
            MigrationState::Pending
        }
    }

    fn applies_to(&self, build: &str) -> bool {
        match build.trim().parse::<u64>() {
            Ok(number) => number >= self.minimum_build,
            Err(_) => {
                warn!("Build identifier {build:?} is not numeric; skipping data repair");
                false
            }
        }
    }

    /// Runs the repair for `build` if it is still pending.
    pub async fn run(&self, db: &Database, build: &str) -> CoreResult<GateOutcome> {
        if !self.applies_to(build) {
            return Ok(GateOutcome::Skipped);
        }

        if self.state(build) == MigrationState::Done {
            return Ok(GateOutcome::AlreadyDone);
        }

        let incomplete = |source: anyhow::Error| CoreError::MigrationIncomplete {
            build: build.to_string(),
            source,
        };

        let patched = db.backfill_task_uids().await.map_err(incomplete)?;
        self.ledger.mark_done(build).map_err(incomplete)?;

        info!("Data repair for build {build} finished; {patched} task(s) received identifiers");
        Ok(GateOutcome::Repaired { patched })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use tempfile::tempdir;

    use super::*;
    use crate::db::{open_store, AccessMode, NewTask, StoreScope};

    #[derive(Default)]
    struct FlakyLedger {
        done: Mutex<HashSet<String>>,
        fail_next_write: AtomicBool,
    }

    impl MigrationLedger for FlakyLedger {
        fn is_done(&self, build: &str) -> bool {
            self.done.lock().unwrap().contains(build)
        }

        fn mark_done(&self, build: &str) -> Result<()> {
            if self.fail_next_write.swap(false, Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            self.done.lock().unwrap().insert(build.to_string());
            Ok(())
        }
    }

    async fn store_with_legacy_tasks(count: usize) -> Database {
        let db = open_store(StoreScope::InMemory).unwrap();
        for n in 0..count {
            db.insert_legacy_task(NewTask::named(format!("legacy {n}")))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn repair_assigns_unique_identifiers() {
        let db = store_with_legacy_tasks(5).await;
        db.create_task(NewTask::named("modern")).await.unwrap();
        let ledger = FlakyLedger::default();
        let gate = MigrationGate::new(&ledger);

        let outcome = gate.run(&db, "3").await.unwrap();
        assert_eq!(outcome, GateOutcome::Repaired { patched: 5 });
        assert_eq!(gate.state("3"), MigrationState::Done);

        let tasks = db.fetch_tasks().await.unwrap();
        let uids: HashSet<_> = tasks.iter().map(|t| t.uid.clone().unwrap()).collect();
        assert_eq!(uids.len(), tasks.len());
    }

    #[tokio::test]
    async fn second_run_is_the_fast_path() {
        let db = store_with_legacy_tasks(2).await;
        let ledger = FlakyLedger::default();
        let gate = MigrationGate::new(&ledger);

        gate.run(&db, "1").await.unwrap();
        let before = db.fetch_tasks().await.unwrap();

        // Rows added after Done are not scanned again for this build.
        db.insert_legacy_task(NewTask::named("late")).await.unwrap();
        assert_eq!(gate.run(&db, "1").await.unwrap(), GateOutcome::AlreadyDone);

        let after = db.fetch_tasks().await.unwrap();
        assert_eq!(&after[..before.len()], &before[..]);
        assert!(after.last().unwrap().uid.is_none());
    }

    #[tokio::test]
    async fn rerunning_the_repair_leaves_existing_identifiers_alone() {
        let db = store_with_legacy_tasks(3).await;
        let first = FlakyLedger::default();
        MigrationGate::new(&first).run(&db, "4").await.unwrap();
        let once = db.fetch_tasks().await.unwrap();

        // A fresh ledger forgets Done; the repair itself must still be a no-op.
        let second = FlakyLedger::default();
        let outcome = MigrationGate::new(&second).run(&db, "4").await.unwrap();
        assert_eq!(outcome, GateOutcome::Repaired { patched: 0 });
        assert_eq!(db.fetch_tasks().await.unwrap(), once);
    }

    #[tokio::test]
    async fn below_threshold_is_a_noop() {
        let db = store_with_legacy_tasks(1).await;
        let ledger = FlakyLedger::default();
        let gate = MigrationGate::new(&ledger).with_minimum_build(10);

        assert_eq!(gate.run(&db, "9").await.unwrap(), GateOutcome::Skipped);
        assert_eq!(gate.run(&db, "beta").await.unwrap(), GateOutcome::Skipped);
        assert_eq!(gate.state("9"), MigrationState::Pending);
        assert!(db.fetch_tasks().await.unwrap()[0].uid.is_none());
    }

    #[tokio::test]
    async fn failed_flag_write_stays_pending_and_retries() {
        let db = store_with_legacy_tasks(2).await;
        let ledger = FlakyLedger::default();
        ledger.fail_next_write.store(true, Ordering::SeqCst);
        let gate = MigrationGate::new(&ledger);

        let err = gate.run(&db, "2").await.unwrap_err();
        assert!(matches!(err, CoreError::MigrationIncomplete { .. }));
        assert_eq!(gate.state("2"), MigrationState::Pending);

        assert_eq!(
            gate.run(&db, "2").await.unwrap(),
            GateOutcome::Repaired { patched: 0 }
        );
        assert_eq!(gate.state("2"), MigrationState::Done);
    }

    #[tokio::test]
    async fn failed_flush_stays_pending() {
        let dir = tempdir().unwrap();
        let scope = StoreScope::durable(dir.path());
        let _writer = open_store(scope.clone()).unwrap();
        let reader = crate::db::Database::open(scope, AccessMode::ReadOnly).unwrap();
        let ledger = FlakyLedger::default();
        let gate = MigrationGate::new(&ledger);

        assert!(gate.run(&reader, "5").await.is_err());
        assert_eq!(gate.state("5"), MigrationState::Pending);
    }

    #[tokio::test]
    async fn settings_file_is_a_ledger() {
        let dir = tempdir().unwrap();
        let settings = SettingsStore::in_container(dir.path()).unwrap();
        let db = store_with_legacy_tasks(1).await;

        MigrationGate::new(&settings).run(&db, "7").await.unwrap();
        let reopened = SettingsStore::in_container(dir.path()).unwrap();
        assert_eq!(MigrationGate::new(&reopened).state("7"), MigrationState::Done);
    }
}
