//! Fatal, non-retried error taxonomy.
//!
//! These travel inside `anyhow::Error`; the orchestrator recovers them with
//! `downcast_ref::<AtomError>()` to fill [`RunResult::reason`](crate::core::types::RunResult).

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::FailureReason;

#[derive(Debug, Error)]
pub enum AtomError {
    #[error("missing prompt fragment '{fragment}' (searched: {})", display_paths(.searched))]
    MissingPromptFragment {
        fragment: String,
        searched: Vec<PathBuf>,
    },

    #[error("working directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("agent executable not found: {0}")]
    AgentNotFound(String),

    #[error("interrupted by user")]
    Interrupted,
}

impl AtomError {
    pub fn reason(&self) -> FailureReason {
        match self {
            AtomError::MissingPromptFragment { .. } => FailureReason::MissingPromptFragment,
            AtomError::DirectoryNotFound(_) => FailureReason::DirectoryNotFound,
            AtomError::AgentNotFound(_) => FailureReason::AgentNotFound,
            AtomError::Interrupted => FailureReason::Interrupted,
        }
    }
}

/// Map any error to a structured reason when it wraps an [`AtomError`].
pub fn failure_reason(err: &anyhow::Error) -> Option<FailureReason> {
    err.downcast_ref::<AtomError>().map(AtomError::reason)
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no search paths".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
