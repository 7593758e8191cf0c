//! Domain models.

mod profile;
mod queue;
mod worker_status;

pub use profile::{
    Classification, ExistingRecord, FlaggedResult, MemberPage, Profile, RecordStatus,
};
pub use queue::{LaneDepths, Priority, QueueInfo, QueueItem, QueueStatus};
pub use worker_status::{WorkerStatus, WorkerType};
