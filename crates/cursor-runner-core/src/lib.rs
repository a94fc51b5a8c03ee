//! Agent Execution Supervisor: spawns, bounds, and iterates an external
//! coding-agent CLI behind a synchronous or webhook-delivered HTTP
//! interface. See `cursor-runner-server` for the HTTP surface; this crate
//! is the core, transport-agnostic engine.

pub mod agent_cli;
pub mod callback;
pub mod cancel;
pub mod config;
pub mod conversation;
pub mod error;
pub mod facade;
pub mod ids;
pub mod output_parser;
pub mod request;
pub mod review_loop;
pub mod security;
pub mod semaphore;
pub mod supervisor;

pub use error::{CoreError, Result};

use tracing::info;

/// Initialise a default tracing subscriber for the library consumer.
///
/// Call this once at program start. Uses `RUST_LOG` env var for filtering,
/// defaulting to `info` level.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).init();

    info!("cursor-runner tracing initialised");
}
