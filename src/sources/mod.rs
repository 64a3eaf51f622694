//! Source implementations and the compile-time factory registries
//!
//! Every syncer and processor registers a constructor under the string
//! key the registry YAML references. The maps are built once at first
//! use; the loader validates that every configured key resolves, so a
//! typo in YAML is a startup failure, not a runtime one.

pub mod google;
pub mod ios;
pub mod notion;
pub mod strava;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::processing::StreamProcessor;
use crate::sync::{SyncContext, Syncer};

/// Compile-time processor constructor.
pub type ProcessorFactory = fn() -> Box<dyn StreamProcessor>;
/// Compile-time syncer constructor.
pub type SyncerFactory = fn(SyncContext) -> Box<dyn Syncer>;

static PROCESSORS: OnceLock<HashMap<&'static str, ProcessorFactory>> = OnceLock::new();
static SYNCERS: OnceLock<HashMap<&'static str, SyncerFactory>> = OnceLock::new();

fn processors() -> &'static HashMap<&'static str, ProcessorFactory> {
    PROCESSORS.get_or_init(|| {
        let mut map: HashMap<&'static str, ProcessorFactory> = HashMap::new();
        map.insert("google_calendar", google::calendar::processor_factory);
        map.insert("ios_location", ios::location::processor_factory);
        map.insert("ios_healthkit", ios::healthkit::processor_factory);
        map.insert("ios_mic", ios::mic::processor_factory);
        map.insert("notion_pages", notion::pages::processor_factory);
        map.insert("strava_activities", strava::activities::processor_factory);
        map
    })
}

fn syncers() -> &'static HashMap<&'static str, SyncerFactory> {
    SYNCERS.get_or_init(|| {
        let mut map: HashMap<&'static str, SyncerFactory> = HashMap::new();
        map.insert("google_calendar", google::calendar::syncer_factory);
        map.insert("notion_pages", notion::pages::syncer_factory);
        map.insert("strava_activities", strava::activities::syncer_factory);
        map
    })
}

/// Look up a processor constructor by its factory key.
pub fn processor_for(key: &str) -> Option<ProcessorFactory> {
    processors().get(key).copied()
}

/// Look up a syncer constructor by its factory key.
pub fn syncer_for(key: &str) -> Option<SyncerFactory> {
    syncers().get(key).copied()
}
