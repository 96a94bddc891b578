//! ShuttlX Sync - phone/watch data sync core
//!
//! Keeps training programs and sessions converged between two cooperating
//! processes through a shared on-disk container and a peer channel, using
//! last-writer-wins on each record's modification stamp.

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod merge;
pub mod models;
pub mod monitor;
pub mod preferences;
pub mod store;

// Re-export commonly used types
pub use config::{DeviceRole, SyncConfig};
pub use connectivity::{
    ActivationState, ConnectivitySession, ConnectivityStatus, LinkState, MemoryLink, PeerLink,
    TcpLink,
};
pub use coordinator::{Diagnostics, SyncCoordinator, SyncHandle};
pub use error::{Result, SyncError};
pub use merge::{merge_into, resolve, DeviceId, MergeReport, Winner};
pub use models::{
    builtin_programs, RecordSyncState, SyncRecord, TrainingIntensity, TrainingInterval,
    TrainingProgram, TrainingSession,
};
pub use monitor::HealthMonitor;
pub use preferences::PreferenceStore;
pub use store::{SharedRecordStore, StorageLocation};
