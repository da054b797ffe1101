//! Autonomous agent orchestration loop.
//!
//! `atom` repeatedly invokes an external coding-agent CLI on a task until the
//! agent prints a termination marker or an iteration cap is reached. Around
//! that loop it composes the system prompt from layered fragments, classifies
//! failures into retry decisions, analyzes task complexity, optionally splits
//! complex tasks into steps, and gates retrieved memory by relevance.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, reset-time
//!   parsing, task analysis, rule tables). No I/O.
//! - **[`io`]**: Side-effecting operations (agent processes, prompt files,
//!   ledger, config, memory backend, state store).
//! - **[`agents`]**: Auxiliary agent passes (planner, critic, verifier).
//!
//! [`orchestrator`] ties these together into the run state machine.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
