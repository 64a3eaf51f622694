//! Strava source: activities pull stream

pub mod activities;
