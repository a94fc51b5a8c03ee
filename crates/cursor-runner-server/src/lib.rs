//! Thin HTTP gateway wiring `cursor-runner-core`'s Async Execution Facade to
//! the `axum` surface described in spec.md §6. No business logic beyond
//! request validation and status-code translation lives here; see
//! `cursor-runner-core` for the Agent Execution Supervisor itself.

pub mod error;
pub mod routes;
pub mod state;
