//! Store access for the integrity engine

pub mod responses;

pub use responses::{
    AbandonUpdate, BulkWriteOutcome, PageCursor, RecordFailure, RecordFetch, RecordUpdate,
    ResponseRepository, UpdateFields,
};
