//! Credential storage.
//!
//! Two named slots, `access_credential` and `renewal_credential`, both plain
//! strings and both absent when logged out. Only the session controller
//! writes to a store; everything else goes through the controller.
//!
//! [`FileCredentialStore`] survives process restarts. Writes replace the file
//! atomically (unique temp file + rename) so a crash mid-write never leaves a
//! truncated store behind.

use common::secret::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Named credential slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSlot {
    /// Short-lived credential sent on every authenticated request.
    Access,
    /// Longer-lived credential exchanged for a new access credential.
    Renewal,
}

impl CredentialSlot {
    /// Both slots, in clearing order.
    pub const ALL: [CredentialSlot; 2] = [CredentialSlot::Access, CredentialSlot::Renewal];

    /// Persisted key for this slot.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            CredentialSlot::Access => "access_credential",
            CredentialSlot::Renewal => "renewal_credential",
        }
    }
}

impl fmt::Display for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Credential store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("Corrupt credential store: {0}")]
    Corrupt(String),
}

/// Persistent key-value storage for the two credential slots.
pub trait CredentialStore: Send + Sync {
    /// Read a slot. `Ok(None)` when the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backing storage cannot be read.
    fn load(&self, slot: CredentialSlot) -> Result<Option<SecretString>, StoreError>;

    /// Write a slot, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backing storage cannot be written.
    fn save(&self, slot: CredentialSlot, value: &SecretString) -> Result<(), StoreError>;

    /// Empty a slot. Removing an empty slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backing storage cannot be written.
    fn remove(&self, slot: CredentialSlot) -> Result<(), StoreError>;

    /// Empty both slots.
    ///
    /// # Errors
    ///
    /// Returns the first `StoreError` encountered; both slots are attempted.
    fn clear(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for slot in CredentialSlot::ALL {
            if let Err(e) = self.remove(slot) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Store that lives only as long as the process. Used by tests and by
/// embedders that persist credentials elsewhere.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slots: Mutex<HashMap<CredentialSlot, SecretString>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, slot: CredentialSlot) -> Result<Option<SecretString>, StoreError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(&slot).cloned())
    }

    fn save(&self, slot: CredentialSlot, value: &SecretString) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(slot, value.clone());
        Ok(())
    }

    fn remove(&self, slot: CredentialSlot) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&slot);
        Ok(())
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let occupied: Vec<&str> = CredentialSlot::ALL
            .iter()
            .filter(|slot| slots.contains_key(slot))
            .map(|slot| slot.key())
            .collect();
        f.debug_struct("MemoryCredentialStore")
            .field("occupied", &occupied)
            .finish()
    }
}

// =============================================================================
// File store
// =============================================================================

/// JSON file store: `{"access_credential": "...", "renewal_credential": "..."}`.
///
/// The file is deleted when both slots are empty. On Unix it is created with
/// mode `0600`.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_slots(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    /// Read for modification. An unreadable file is replaced rather than
    /// blocking every future write.
    fn read_slots_for_update(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match self.read_slots() {
            Err(StoreError::Corrupt(reason)) => {
                warn!(
                    target: "session.store",
                    path = %self.path.display(),
                    reason = %reason,
                    "Discarding corrupt credential store"
                );
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_slots(&self, slots: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if slots.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::Io(e.to_string())),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let json =
            serde_json::to_string_pretty(slots).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = self
            .path
            .with_file_name(format!("{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        replace_file(&tmp_path, &self.path, json.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;

        debug!(
            target: "session.store",
            path = %self.path.display(),
            slots = slots.len(),
            "Credential store written"
        );
        Ok(())
    }
}

/// Write `contents` to `tmp_path`, then move it over `path`. The temp file
/// is removed if either step fails.
fn replace_file(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_private(tmp_path, contents)
        .and_then(|()| std::fs::rename(tmp_path, path))
        .inspect_err(|_| {
            let _ = std::fs::remove_file(tmp_path);
        })
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, slot: CredentialSlot) -> Result<Option<SecretString>, StoreError> {
        let slots = self.read_slots()?;
        Ok(slots
            .get(slot.key())
            .filter(|value| !value.is_empty())
            .map(|value| SecretString::from(value.clone())))
    }

    fn save(&self, slot: CredentialSlot, value: &SecretString) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots = self.read_slots_for_update()?;
        slots.insert(slot.key().to_string(), value.expose_secret().to_string());
        self.write_slots(&slots)
    }

    fn remove(&self, slot: CredentialSlot) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots = self.read_slots_for_update()?;
        // Nothing to rewrite unless the slot was present or the file is
        // now empty (this also removes a discarded corrupt file)
        if slots.remove(slot.key()).is_none() && !slots.is_empty() {
            return Ok(());
        }
        self.write_slots(&slots)
    }
}
