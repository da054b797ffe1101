//! Deterministic, pure logic shared by the runtime.
//!
//! Core modules must be free of I/O side effects. They operate on text, numbers
//! and an explicit clock, and return deterministic outputs suitable for tests.

pub mod analyzer;
pub mod classifier;
pub mod reset_time;
pub mod rules;
pub mod types;
