//! Google Calendar pull stream
//!
//! Incremental sync rides Google's per-calendar sync tokens; the stream
//! cursor is a JSON map of calendar id to token so multi-calendar setups
//! resume independently. A 410 from Google invalidates one calendar's
//! token and falls that calendar back to a range sync without touching
//! the others.

mod processor;
mod syncer;

pub use processor::GoogleCalendarProcessor;
pub use syncer::GoogleCalendarSyncer;

use crate::processing::StreamProcessor;
use crate::sync::{SyncContext, Syncer};

pub fn processor_factory() -> Box<dyn StreamProcessor> {
    Box::new(GoogleCalendarProcessor)
}

pub fn syncer_factory(ctx: SyncContext) -> Box<dyn Syncer> {
    Box::new(GoogleCalendarSyncer::new(ctx))
}
