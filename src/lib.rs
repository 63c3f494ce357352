//! filegate: a self-hosted file browser with byte-range downloads, public
//! share links and an IP perimeter gate.

pub mod config;
pub mod files;
pub mod logging;
pub mod server;
pub mod store;
