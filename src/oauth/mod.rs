//! OAuth token management for cloud sources
//!
//! Token refresh is modeled as a small state machine owned by the sync
//! runtime: {Valid, NearExpiry, Refreshing, RefreshFailed}. A per-source
//! single-flight guard prevents concurrent refreshes against the same
//! provider; secret storage itself is external, the rows here hold the
//! token material the collaborating store provides.

mod token_manager;

pub use token_manager::{OAuthToken, TokenManager, TokenState};
