//! iOS device source: push streams from the phone client

pub mod healthkit;
pub mod location;
pub mod mic;
