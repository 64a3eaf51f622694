//! Typed query/command layer over the relational store
//!
//! All row mutation goes through these helpers; components never write SQL
//! against the shared tables themselves. Each helper opens its own
//! statements against the pool (or a caller-supplied transaction where the
//! contract requires atomicity).

pub mod activities;
pub mod events;
pub mod models;
pub mod semantics;
pub mod signals;
pub mod sources;
pub mod streams;
pub mod transitions;

pub use models::*;
