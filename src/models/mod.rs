//! Domain records exchanged between the phone and the watch.

pub mod program;
pub mod record;
pub mod session;

pub use program::{
    builtin_programs, Difficulty, HeartRateZone, IntervalPhase, TrainingIntensity,
    TrainingInterval, TrainingProgram,
};
pub use record::{new_record_id, Collection, RecordSyncState, SyncRecord};
pub use session::{ActivitySegment, ActivityType, LocationSample, TrainingSession};
