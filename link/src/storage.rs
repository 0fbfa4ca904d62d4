//! Profile-scoped key/value storage shared by every tab.
//!
//! A [`ProfileStorage`] stands for one browser profile: a storage backend
//! plus a change broadcast. Each tab works through its own [`TabStorage`]
//! view, and like browser `storage` events a tab's change stream never
//! reports the tab's own writes.

use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::broadcast;

use crate::error::Result;

/// Capacity of the change broadcast before slow tabs lag.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Identifier of one tab view of a profile.
pub type TabId = u64;

/// Raw string storage.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory backend, lost with the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// reader never observes a half-written value.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Use `dir`, creating it when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let _guard = self.write_lock.lock();
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A write made by some tab of the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Changed key; `None` means "anything may have changed" (the observer
    /// lagged behind and missed notifications).
    pub key: Option<String>,

    /// Value after the change; `None` when removed.
    pub new_value: Option<String>,

    /// Tab that made the change, unknown after a lag.
    pub origin: Option<TabId>,
}

impl StorageChange {
    /// Whether this change may concern `key`.
    pub fn affects(&self, key: &str) -> bool {
        self.key.as_deref().map_or(true, |k| k == key)
    }
}

struct ProfileInner {
    backend: Arc<dyn StorageBackend>,
    changes: broadcast::Sender<StorageChange>,
    next_tab: AtomicU64,
}

/// Storage shared by all tabs of one profile.
#[derive(Clone)]
pub struct ProfileStorage {
    inner: Arc<ProfileInner>,
}

impl ProfileStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ProfileInner {
                backend,
                changes,
                next_tab: AtomicU64::new(1),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a new tab view with its own identity.
    pub fn open_tab(&self) -> TabStorage {
        let tab = self.inner.next_tab.fetch_add(1, Ordering::SeqCst);
        log::debug!("[jobdesk-link] Opened storage view for tab {}", tab);
        TabStorage {
            profile: self.clone(),
            tab,
        }
    }
}

/// One tab's view of a [`ProfileStorage`].
#[derive(Clone)]
pub struct TabStorage {
    profile: ProfileStorage,
    tab: TabId,
}

impl TabStorage {
    pub fn tab_id(&self) -> TabId {
        self.tab
    }

    pub fn profile(&self) -> &ProfileStorage {
        &self.profile
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.profile.inner.backend.get(key)
    }

    /// Write and notify the other tabs.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.profile.inner.backend.set(key, value)?;
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    /// Remove and notify the other tabs.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.profile.inner.backend.remove(key)?;
        self.notify(key, None);
        Ok(())
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receiver is not an error: no other tab is listening.
        let _ = self.profile.inner.changes.send(StorageChange {
            key: Some(key.to_string()),
            new_value,
            origin: Some(self.tab),
        });
    }

    /// Changes made by other tabs from now on.
    pub fn changes(&self) -> StorageChanges {
        StorageChanges {
            rx: self.profile.inner.changes.subscribe(),
            tab: self.tab,
        }
    }
}

/// Stream of [`StorageChange`]s made by other tabs.
pub struct StorageChanges {
    rx: broadcast::Receiver<StorageChange>,
    tab: TabId,
}

impl StorageChanges {
    /// Next change, `None` once the profile is gone.
    pub async fn next(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == Some(self.tab) => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "[jobdesk-link] Tab {} missed {} storage change(s)",
                        self.tab,
                        skipped
                    );
                    return Some(StorageChange {
                        key: None,
                        new_value: None,
                        origin: None,
                    });
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").unwrap(), None);
        backend.set("k", "v").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
        backend.remove("k").unwrap();
        backend.remove("k").unwrap();
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("profile")).unwrap();

        backend.set("employer_notifications", "[]").unwrap();
        assert_eq!(
            backend.get("employer_notifications").unwrap().as_deref(),
            Some("[]")
        );
        assert!(dir.path().join("profile/employer_notifications.json").exists());
        assert!(!dir.path().join("profile/employer_notifications.json.tmp").exists());

        backend.remove("employer_notifications").unwrap();
        assert_eq!(backend.get("employer_notifications").unwrap(), None);
        backend.remove("employer_notifications").unwrap();
    }

    #[test]
    fn test_file_backend_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.set("../escape/key", "x").unwrap();
        assert!(dir.path().join(".._escape_key.json").exists());
        assert_eq!(backend.get("../escape/key").unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_changes_skip_own_writes() {
        let profile = ProfileStorage::in_memory();
        let tab_a = profile.open_tab();
        let tab_b = profile.open_tab();
        assert_ne!(tab_a.tab_id(), tab_b.tab_id());

        let mut changes_a = tab_a.changes();
        let mut changes_b = tab_b.changes();

        tab_a.set("auth_token", "{}").unwrap();
        tab_b.remove("auth_token").unwrap();

        let seen_by_b = changes_b.next().await.unwrap();
        assert_eq!(seen_by_b.key.as_deref(), Some("auth_token"));
        assert_eq!(seen_by_b.new_value.as_deref(), Some("{}"));
        assert_eq!(seen_by_b.origin, Some(tab_a.tab_id()));

        let seen_by_a = changes_a.next().await.unwrap();
        assert_eq!(seen_by_a.new_value, None);
        assert_eq!(seen_by_a.origin, Some(tab_b.tab_id()));

        // Tabs share the same data
        assert_eq!(tab_a.get("auth_token").unwrap(), None);
    }

    #[tokio::test]
    async fn test_lagged_observer_gets_wildcard_change() {
        let profile = ProfileStorage::in_memory();
        let writer = profile.open_tab();
        let reader = profile.open_tab();
        let mut changes = reader.changes();

        for i in 0..(CHANGE_CHANNEL_CAPACITY + 8) {
            writer.set("k", &i.to_string()).unwrap();
        }

        let change = changes.next().await.unwrap();
        assert_eq!(change.key, None);
        assert!(change.affects("anything"));
    }
}
