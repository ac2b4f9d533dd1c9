//! Deterministic, pure logic shared by the runner core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod config_merge;
pub mod plan_parser;
pub mod router;
pub mod selector;
pub mod transitions;
pub mod types;
