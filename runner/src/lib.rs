//! Durable plan execution for an external coding assistant.
//!
//! A plan document becomes an ordered, persisted task queue. Tasks are dispatched one
//! at a time to skill-specific handlers, each run with a service configuration merged
//! from three precedence tiers. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, state machine, selection,
//!   routing, config precedence). No I/O.
//! - **[`io`]**: Side-effecting operations (SQLite store, config files, claim locks,
//!   process execution).
//!
//! [`orchestrator`] and [`plan`] coordinate the two to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
