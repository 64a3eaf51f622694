//! Meridian - personal telemetry pipeline
//!
//! Pulls data from cloud providers and accepts device pushes, normalizes
//! everything into deduplicated signal and semantic records, detects
//! per-signal transitions, and segments each day into contiguous events.

pub mod cli;
pub mod client;
pub mod database;
pub mod detectors;
pub mod error;
pub mod normalize;
pub mod oauth;
pub mod observability;
pub mod processing;
pub mod push;
pub mod registry;
pub mod scheduler;
pub mod segmenter;
pub mod sources;
pub mod storage;
pub mod store;
pub mod sync;

// Re-export main types
pub use client::{AppConfig, Meridian, MeridianBuilder};
pub use error::{Error, Result};

// Re-export the seams source modules implement against
pub use processing::StreamProcessor;
pub use sync::{SyncWindow, Syncer};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
