use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tempfile::NamedTempFile;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATA_DIR_ENV: &str = "FOCUSLINK_DATA_DIR";
const SHARED_GROUP_DIR: &str = "group.focuslink";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    /// Host capability flag for live sessions.
    pub live_sessions_enabled: bool,
    pub default_focus_minutes: u32,
    pub relay_queue_capacity: usize,
    /// One-time repair state, keyed by build identifier.
    pub migrations: BTreeMap<String, bool>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            live_sessions_enabled: true,
            default_focus_minutes: 25,
            relay_queue_capacity: 64,
            migrations: BTreeMap::new(),
        }
    }
}

/// Shared container every execution context resolves to: `$FOCUSLINK_DATA_DIR`
/// when set, otherwise the per-user data directory.
pub fn shared_container_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|dir| dir.join(SHARED_GROUP_DIR))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn in_container(container: &Path) -> Result<Self> {
        Self::new(container.join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn live_sessions_enabled(&self) -> bool {
        self.read().live_sessions_enabled
    }

    pub fn default_focus_minutes(&self) -> u32 {
        self.read().default_focus_minutes
    }

    pub fn relay_queue_capacity(&self) -> usize {
        self.read().relay_queue_capacity.max(1)
    }

    pub fn set_live_sessions_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|data| data.live_sessions_enabled = enabled)
    }

    pub fn migration_done(&self, build: &str) -> bool {
        self.read().migrations.get(build).copied().unwrap_or(false)
    }

    pub fn mark_migration_done(&self, build: &str) -> Result<()> {
        self.update(|data| {
            data.migrations.insert(build.to_string(), true);
        })
    }

    /// Applies `change` on top of the file as it is now, not on our cached
    /// copy, so values other processes wrote since we loaded survive. A build
    /// marked done on disk or in memory stays done. The cache only moves
    /// forward once the new file is in place.
    fn update(&self, change: impl FnOnce(&mut UserSettings)) -> Result<()> {
        let mut guard = self.write();
        let mut next = self.load_from_disk().unwrap_or_else(|| guard.clone());
        for (build, done) in guard.migrations.iter() {
            if *done {
                next.migrations.insert(build.clone(), true);
            }
        }
        change(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn load_from_disk(&self) -> Option<UserSettings> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(
                    "Overwriting unreadable settings at {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Stages the file next to its destination and renames it into place.
    fn persist(&self, data: &UserSettings) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let serialized = serde_json::to_string_pretty(data)?;
        let mut staged = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage settings in {}", dir.display()))?;
        staged.write_all(serialized.as_bytes())?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SettingsStore {
    /// Re-reads the file, picking up flags another process has written.
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_missing_or_corrupt() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::in_container(dir.path()).unwrap();
        assert_eq!(store.snapshot(), UserSettings::default());

        fs::write(dir.path().join(SETTINGS_FILE_NAME), "{not json").unwrap();
        let store = SettingsStore::in_container(dir.path()).unwrap();
        assert!(store.live_sessions_enabled());
        assert_eq!(store.default_focus_minutes(), 25);
    }

    #[test]
    fn migration_flags_persist_per_build() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::in_container(dir.path()).unwrap();
        store.mark_migration_done("12").unwrap();

        let reopened = SettingsStore::in_container(dir.path()).unwrap();
        assert!(reopened.migration_done("12"));
        assert!(!reopened.migration_done("13"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{ "live_sessions_enabled": false }"#,
        )
        .unwrap();
        let store = SettingsStore::in_container(dir.path()).unwrap();
        assert!(!store.live_sessions_enabled());
        assert_eq!(store.relay_queue_capacity(), 64);
    }

    #[test]
    fn reload_sees_other_writers() {
        let dir = tempdir().unwrap();
        let ours = SettingsStore::in_container(dir.path()).unwrap();
        let theirs = SettingsStore::in_container(dir.path()).unwrap();
        theirs.set_live_sessions_enabled(false).unwrap();

        assert!(ours.live_sessions_enabled());
        ours.reload().unwrap();
        assert!(!ours.live_sessions_enabled());
    }

    #[test]
    fn writers_in_two_processes_keep_each_others_flags() {
        let dir = tempdir().unwrap();
        let primary = SettingsStore::in_container(dir.path()).unwrap();
        let widget = SettingsStore::in_container(dir.path()).unwrap();

        primary.mark_migration_done("1").unwrap();
        widget.set_live_sessions_enabled(false).unwrap();

        let fresh = SettingsStore::in_container(dir.path()).unwrap();
        assert!(fresh.migration_done("1"));
        assert!(!fresh.live_sessions_enabled());
        assert!(widget.migration_done("1"));

        // A stale writer cannot clear a flag it once saw as done.
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "{}").unwrap();
        primary.set_live_sessions_enabled(true).unwrap();
        let fresh = SettingsStore::in_container(dir.path()).unwrap();
        assert!(fresh.migration_done("1"));
    }

    #[test]
    fn writes_replace_the_file_in_one_step() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::in_container(&dir.path().join("nested")).unwrap();
        for build in ["1", "2", "3"] {
            store.mark_migration_done(build).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(SETTINGS_FILE_NAME)]);
        let on_disk: UserSettings =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk.migrations.len(), 3);
    }
}
