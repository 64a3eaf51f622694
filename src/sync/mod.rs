//! Sync runtime for pull streams
//!
//! Drives source-specific syncers with a resume cursor or a time range,
//! manages OAuth, records audit rows, retries transient upstream
//! failures with backoff, and lands raw batches in the object store.

pub mod backoff;
mod runtime;
mod syncer;
mod throttle;

pub use runtime::{SyncOutcome, SyncRuntime};
pub use syncer::{ScopeError, SyncContext, Syncer, SyncerRun, SyncWindow};
pub use throttle::Throttle;
