//! Google source: calendar pull stream

pub mod calendar;
pub mod client;
