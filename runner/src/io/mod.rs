//! Side-effecting operations: storage, config files, locks and process execution.

pub mod claim_lock;
pub mod config;
pub mod executor;
pub mod fragments;
pub mod init;
pub mod process;
pub mod profile;
pub mod prompt;
pub mod service_check;
pub mod skills;
pub mod task_store;
