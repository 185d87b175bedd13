//! # tig-server
//!
//! HTTP API over a tig workspace. Auto-tracking repositories keep their
//! watcher running for as long as the server is up.

pub mod api;
pub mod server;

pub use server::TigServer;
