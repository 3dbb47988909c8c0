//! Waypoint sync: client data layer for the travel app.
//!
//! Cached and coalesced API access, session and profile resolution, and the
//! launch routing built on top of them.

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod profile;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;
