//! Shared definitions for the netvol library and CLI.

pub mod errors;

pub use errors::{NetvolError, NetvolResult};
