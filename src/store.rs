//! Shared Record Store
//!
//! One JSON array per collection in a directory both processes can reach.
//!
//! ## Guarantees
//!
//! - Writes replace the file atomically (temp sibling + rename), so the peer
//!   process never observes a half-written collection.
//! - Writes within this process are serialized by a single writer lock.
//! - Reads never fail: a corrupted or unreadable file falls back to the last
//!   copy this process decoded successfully, else to an empty collection.
//!
//! There is no cross-process lock. If both processes rewrite the same file
//! at the same moment, the later rename wins at the file level even if the
//! other process merged newer records in memory. Those records come back on
//! the next peer exchange.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::{Result, SyncError};
use crate::models::{Collection, SyncRecord};
use crate::monitor::HealthMonitor;

/// Where the store ended up living
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// The group container shared with the companion process
    Shared(PathBuf),
    /// Private fallback; cross-process sharing is silently off
    ProcessLocal(PathBuf),
}

impl StorageLocation {
    pub fn path(&self) -> &Path {
        match self {
            StorageLocation::Shared(p) | StorageLocation::ProcessLocal(p) => p,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, StorageLocation::Shared(_))
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageLocation::Shared(p) => write!(f, "shared ({})", p.display()),
            StorageLocation::ProcessLocal(p) => write!(f, "process-local ({})", p.display()),
        }
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomic write: write to a `.tmp` sibling then rename into place.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}-{}.tmp", std::process::id(), seq));
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

pub struct SharedRecordStore {
    location: StorageLocation,
    monitor: Arc<HealthMonitor>,
    /// Single writer per process
    writer: Mutex<()>,
    /// Last bytes of each collection that decoded cleanly
    last_good: RwLock<HashMap<Collection, Vec<u8>>>,
}

impl SharedRecordStore {
    /// Resolve the storage location and open the store
    pub fn open(config: &StorageConfig, monitor: Arc<HealthMonitor>) -> Result<Self> {
        let location = Self::resolve_location(config, &monitor)?;
        log::info!("Record store at {}", location);

        Ok(Self {
            location,
            monitor,
            writer: Mutex::new(()),
            last_good: RwLock::new(HashMap::new()),
        })
    }

    fn resolve_location(config: &StorageConfig, monitor: &HealthMonitor) -> Result<StorageLocation> {
        if let Some(container) = config.container_path() {
            match std::fs::create_dir_all(&container) {
                Ok(()) if container.is_dir() => return Ok(StorageLocation::Shared(container)),
                Ok(()) => monitor.warn(format!(
                    "Shared container {} is not a directory, using fallback",
                    container.display()
                )),
                Err(e) => monitor.warn(format!(
                    "Shared container {} unavailable ({}), using fallback",
                    container.display(),
                    e
                )),
            }
        } else {
            monitor.warn("No shared container configured, using fallback");
        }

        let fallback = config.fallback_path();
        std::fs::create_dir_all(&fallback).map_err(|e| {
            SyncError::StorageUnavailable(format!("{}: {}", fallback.display(), e))
        })?;
        monitor.warn(format!(
            "Storage is process-local at {}; cross-device sync through the container is off",
            fallback.display()
        ));

        Ok(StorageLocation::ProcessLocal(fallback))
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Directory holding the collection files
    pub fn root(&self) -> &Path {
        self.location.path()
    }

    pub fn collection_path(&self, collection: Collection) -> PathBuf {
        self.root().join(collection.file_name())
    }

    /// Load a collection; never fails
    pub fn load<T: SyncRecord>(&self) -> Vec<T> {
        let collection = T::COLLECTION;
        let path = self.collection_path(collection);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                self.monitor
                    .error(format!("Failed to read {}: {}", path.display(), e));
                return self.last_good_or_empty(collection);
            }
        };

        match serde_json::from_slice::<Vec<T>>(&bytes) {
            Ok(records) => {
                self.last_good.write().insert(collection, bytes);
                records
            }
            Err(e) => {
                let err = SyncError::DecodeFailure {
                    collection: collection.to_string(),
                    message: e.to_string(),
                };
                self.monitor.error(format!("Corrupted store file: {}", err));
                self.last_good_or_empty(collection)
            }
        }
    }

    fn last_good_or_empty<T: SyncRecord>(&self, collection: Collection) -> Vec<T> {
        let cached = self.last_good.read().get(&collection).cloned();
        match cached.map(|bytes| serde_json::from_slice::<Vec<T>>(&bytes)) {
            Some(Ok(records)) => {
                self.monitor.warn(format!(
                    "Using last good copy of {} ({} records)",
                    collection,
                    records.len()
                ));
                records
            }
            _ => Vec::new(),
        }
    }

    /// Replace a collection atomically
    pub fn save<T: SyncRecord>(&self, records: &[T]) -> Result<()> {
        let _guard = self.writer.lock();
        self.write_unlocked(records)
    }

    fn write_unlocked<T: SyncRecord>(&self, records: &[T]) -> Result<()> {
        let collection = T::COLLECTION;
        let bytes = serde_json::to_vec(records)?;
        atomic_write(&self.collection_path(collection), &bytes)?;
        self.last_good.write().insert(collection, bytes);
        log::debug!("Saved {} {}", records.len(), collection);
        Ok(())
    }

    /// Read-modify-write under the writer lock
    pub fn modify<T, R, F>(&self, f: F) -> Result<R>
    where
        T: SyncRecord,
        F: FnOnce(&mut Vec<T>) -> R,
    {
        let _guard = self.writer.lock();
        let mut records = self.load::<T>();
        let result = f(&mut records);
        self.write_unlocked(&records)?;
        Ok(result)
    }

    /// Insert or replace one record by id
    pub fn upsert<T: SyncRecord>(&self, record: T) -> Result<()> {
        self.modify::<T, _, _>(|records| {
            match records.iter_mut().find(|r| r.id() == record.id()) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        })
    }

    pub fn get<T: SyncRecord>(&self, id: &str) -> Option<T> {
        self.load::<T>().into_iter().find(|r| r.id() == id)
    }

    /// Drop every record of a collection, returning how many were removed
    pub fn purge<T: SyncRecord>(&self) -> Result<usize> {
        self.modify::<T, _, _>(|records| {
            let removed = records.len();
            records.clear();
            removed
        })
    }
}
