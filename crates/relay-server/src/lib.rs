//! # Relay Server
//!
//! HTTP front end for the relay bridge. Callers issue commands over plain
//! HTTP, room peers connect over WebSocket and answer them, and passive
//! listeners follow a room's traffic as server-sent events.

pub mod config;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod socket;
pub mod tls;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
