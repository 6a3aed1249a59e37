//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities.

pub mod sync_job;

pub use sync_job::{ControlOutcome, NewSyncJob, SyncJobRepository};
