//! The record contract shared by every synced collection.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A synced collection, one JSON file each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Programs,
    Sessions,
}

impl Collection {
    /// File name inside the shared container
    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Programs => "programs.json",
            Collection::Sessions => "sessions.json",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Programs => f.write_str("programs"),
            Collection::Sessions => f.write_str("sessions"),
        }
    }
}

/// Implemented by every element of a synced collection.
///
/// The last-modified stamp is the logical clock for last-writer-wins:
/// for any id, the copy with the later stamp is the one both replicas keep.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection this record type lives in
    const COLLECTION: Collection;

    /// Push the whole collection on publish instead of only the changed record
    const PUSH_FULL_COLLECTION: bool;

    fn id(&self) -> &str;

    fn last_modified(&self) -> DateTime<Utc>;

    fn set_last_modified(&mut self, at: DateTime<Utc>);
}

/// Sync lifecycle of a single record, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSyncState {
    /// Written locally, no push attempted yet
    LocalOnly,
    /// Push in flight (live attempts or queued durable)
    PendingPush,
    /// Peer accepted it over the live channel
    Pushed,
    /// Arrived from the peer and had no local copy
    ReceivedFromPeer,
    /// Arrived from the peer and replaced an older local copy
    Merged,
}

impl std::fmt::Display for RecordSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordSyncState::LocalOnly => "local only",
            RecordSyncState::PendingPush => "pending push",
            RecordSyncState::Pushed => "pushed",
            RecordSyncState::ReceivedFromPeer => "received from peer",
            RecordSyncState::Merged => "merged",
        };
        f.write_str(s)
    }
}

/// Generate a fresh opaque record id
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
