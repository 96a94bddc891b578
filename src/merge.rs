//! Last-writer-wins merge for replicated record collections.
//!
//! The last-modified stamp on each record acts as a (weak) logical clock.
//! `resolve` is a pure function used identically on both devices, so the
//! order in which the live and durable channels deliver copies cannot change
//! the converged state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::models::SyncRecord;

/// A device identifier (random 128-bit ID, generated once per process home)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Generate a new random device ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Load the ID stored at `path`, or create and store a new one
    pub fn load_or_create(path: &Path) -> Self {
        if let Ok(id_str) = std::fs::read_to_string(path) {
            let trimmed = id_str.trim();
            if !trimmed.is_empty() {
                log::debug!("Loaded existing device ID");
                return Self::from_string(trimmed.to_string());
            }
        }

        let new_id = Self::new();
        log::info!("Generated new device ID: {}", new_id);

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create device ID dir: {}", e);
            }
        }
        if let Err(e) = std::fs::write(path, new_id.0.as_bytes()) {
            log::warn!("Failed to save device ID: {}", e);
        }

        new_id
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordering relationship between two last-modified stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// First was written before second
    Before,
    /// Second was written before first
    After,
    /// Same stamp
    Equal,
}

impl ClockOrdering {
    pub fn compare(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => ClockOrdering::Before,
            std::cmp::Ordering::Greater => ClockOrdering::After,
            std::cmp::Ordering::Equal => ClockOrdering::Equal,
        }
    }
}

/// Which copy survives a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Pick the surviving copy of one record. Ties keep the local copy.
pub fn resolve<T: SyncRecord>(local: &T, remote: &T) -> Winner {
    match ClockOrdering::compare(local.last_modified(), remote.last_modified()) {
        ClockOrdering::Before => Winner::Remote,
        ClockOrdering::After | ClockOrdering::Equal => Winner::Local,
    }
}

/// What happened to each incoming record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Ids that had no local copy
    pub inserted: Vec<String>,
    /// Ids whose local copy was replaced by a newer remote one
    pub updated: Vec<String>,
    /// Ids where the local copy won (stale or equal remote)
    pub stale: Vec<String>,
}

impl MergeReport {
    /// Whether the merged collection differs from the local one
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty()
    }

    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.stale.len()
    }
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} stale",
            self.inserted.len(),
            self.updated.len(),
            self.stale.len()
        )
    }
}

/// Merge incoming records into a local collection in place.
///
/// Local order is preserved; inserted records are appended in arrival
/// order. Applying the same batch twice leaves the collection unchanged.
pub fn merge_into<T: SyncRecord>(local: &mut Vec<T>, incoming: Vec<T>) -> MergeReport {
    let mut index: HashMap<String, usize> = local
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id().to_string(), i))
        .collect();

    let mut report = MergeReport::default();

    for remote in incoming {
        let id = remote.id().to_string();
        match index.get(&id) {
            None => {
                index.insert(id.clone(), local.len());
                local.push(remote);
                report.inserted.push(id);
            }
            Some(&i) => match resolve(&local[i], &remote) {
                Winner::Remote => {
                    local[i] = remote;
                    report.updated.push(id);
                }
                Winner::Local => {
                    log::trace!("Discarding stale copy of {}", id);
                    report.stale.push(id);
                }
            },
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TrainingInterval, TrainingProgram};
    use chrono::TimeZone;

    fn program(id: &str, name: &str, secs: i64) -> TrainingProgram {
        let mut p = TrainingProgram::new(name, vec![TrainingInterval::rest(60.0)]);
        p.id = id.to_string();
        p.last_modified = Utc.timestamp_opt(secs, 0).unwrap();
        p
    }

    #[test]
    fn test_device_id_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/device_id");

        let id1 = DeviceId::load_or_create(&path);
        let id2 = DeviceId::load_or_create(&path);
        assert_eq!(id1, id2);
        assert!(!id1.0.is_empty());
    }

    #[test]
    fn test_clock_ordering() {
        let t1 = Utc.timestamp_opt(100, 0).unwrap();
        let t2 = Utc.timestamp_opt(200, 0).unwrap();
        assert_eq!(ClockOrdering::compare(t1, t2), ClockOrdering::Before);
        assert_eq!(ClockOrdering::compare(t2, t1), ClockOrdering::After);
        assert_eq!(ClockOrdering::compare(t1, t1), ClockOrdering::Equal);
    }

    #[test]
    fn test_newer_remote_wins() {
        let local = program("a", "5K", 100);
        let remote = program("a", "5K-edited", 200);
        assert_eq!(resolve(&local, &remote), Winner::Remote);
        assert_eq!(resolve(&remote, &local), Winner::Local);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local = program("a", "local", 100);
        let remote = program("a", "remote", 100);
        assert_eq!(resolve(&local, &remote), Winner::Local);

        let mut collection = vec![local.clone()];
        for _ in 0..3 {
            let report = merge_into(&mut collection, vec![remote.clone()]);
            assert_eq!(report.stale, vec!["a".to_string()]);
        }
        assert_eq!(collection, vec![local]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = vec![program("a", "A", 100)];
        let incoming = vec![program("a", "A2", 150), program("b", "B", 120)];

        merge_into(&mut once, incoming.clone());
        let mut twice = once.clone();
        let report = merge_into(&mut twice, incoming);

        assert_eq!(once, twice);
        assert!(!report.changed());
        assert_eq!(report.stale.len(), 2);
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let base = program("a", "base", 100);
        let v1 = program("a", "v1", 150);
        let v2 = program("a", "v2", 300);

        let mut first = vec![base.clone()];
        merge_into(&mut first, vec![v1.clone()]);
        merge_into(&mut first, vec![v2.clone()]);

        let mut second = vec![base];
        merge_into(&mut second, vec![v2.clone()]);
        merge_into(&mut second, vec![v1]);

        assert_eq!(first, second);
        assert_eq!(first[0].name, "v2");
    }

    #[test]
    fn test_report_counts() {
        let mut local = vec![program("a", "A", 100), program("b", "B", 500)];
        let report = merge_into(
            &mut local,
            vec![program("a", "A'", 200), program("b", "B'", 400), program("c", "C", 1)],
        );
        assert_eq!(report.inserted, vec!["c".to_string()]);
        assert_eq!(report.updated, vec!["a".to_string()]);
        assert_eq!(report.stale, vec!["b".to_string()]);
        assert_eq!(report.total(), 3);
        assert_eq!(report.to_string(), "1 inserted, 1 updated, 1 stale");
    }
}
