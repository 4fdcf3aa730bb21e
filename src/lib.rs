//! Library crate for matchday-sync, exposing modules for binaries and integration tests.

pub mod config;
pub mod model;
pub mod platform;
pub mod store;
pub mod sync;
