//! Notion source: pages semantic stream

pub mod pages;
