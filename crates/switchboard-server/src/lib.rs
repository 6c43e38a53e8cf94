//! # switchboard-server
//!
//! HTTP surface of the Switchboard message hub: the `/ws` endpoint,
//! health and statistics routes, configuration and metrics.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod identity;
pub mod metrics;

pub use config::Config;
pub use handlers::{run_server, serve, AppState};
