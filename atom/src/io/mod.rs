//! Side-effecting operations: filesystem, subprocesses, retrieval, sleeping.

pub mod config;
pub mod interrupt;
pub mod invoker;
pub mod ledger;
pub mod memory;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod task_file;
pub mod templates;
