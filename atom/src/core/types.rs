//! Shared value types for analysis, classification, and run results.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Heuristic size of a task, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Massive,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "SIMPLE",
            Complexity::Moderate => "MODERATE",
            Complexity::Complex => "COMPLEX",
            Complexity::Massive => "MASSIVE",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How eagerly a run is split into subtasks before iterating.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionLevel {
    None,
    Light,
    #[default]
    Standard,
    Aggressive,
}

impl FromStr for DecompositionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "light" => Ok(Self::Light),
            "standard" => Ok(Self::Standard),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!(
                "unknown decomposition level '{other}' (expected none, light, standard, aggressive)"
            )),
        }
    }
}

/// Secondary review passes a task analysis can request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetaAgent {
    Critic,
    Verifier,
}

impl MetaAgent {
    pub fn as_str(self) -> &'static str {
        match self {
            MetaAgent::Critic => "critic",
            MetaAgent::Verifier => "verifier",
        }
    }
}

/// Result of analyzing one task. Produced once per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAnalysis {
    pub complexity: Complexity,
    pub memory_queries: Vec<String>,
    pub suggested_decomposition: Vec<String>,
    pub meta_agents_needed: BTreeSet<MetaAgent>,
    pub estimated_iterations: u32,
    pub needs_tests: bool,
    pub needs_docs: bool,
    pub needs_review: bool,
    pub reasoning: String,
}

/// Classification of one agent invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    SessionLimit,
    TransientNetwork,
    OtherRetryable,
}

/// Whether to retry an invocation, and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub kind: OutcomeKind,
    pub should_retry: bool,
    pub wait: Duration,
}

impl RetryDecision {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            should_retry: false,
            wait: Duration::ZERO,
        }
    }

    pub fn retry(kind: OutcomeKind, wait: Duration) -> Self {
        Self {
            kind,
            should_retry: true,
            wait,
        }
    }

    pub fn wait_seconds(&self) -> f64 {
        self.wait.as_secs_f64()
    }
}

/// One agent call within a run, as kept by the iteration ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    pub raw_output: String,
    pub exit_status: i32,
    /// Seconds since the Unix epoch, stamped at `add` time.
    pub timestamp: f64,
}

/// Structured reason attached to a failed run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MaxIterations,
    AgentNotFound,
    DirectoryNotFound,
    MissingPromptFragment,
    Interrupted,
    /// Unexpected plumbing failure (filesystem, serialization, templates).
    RuntimeError,
}

/// Step list and progress for a decomposed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecompositionProgress {
    pub steps: Vec<String>,
    pub completed: usize,
}

/// Terminal value of one run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunResult {
    pub success: bool,
    pub iterations: u32,
    pub output: String,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    pub reason: Option<FailureReason>,
    pub error: Option<String>,
    pub task_analysis: Option<TaskAnalysis>,
    pub decomposition: Option<DecompositionProgress>,
    pub meta_agents_run: Option<Vec<MetaAgent>>,
    /// Every main-loop iteration in order. Library callers only; the JSON form
    /// of a result omits it (see the ledger mirror).
    #[serde(skip)]
    pub iteration_records: Vec<IterationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_orders_small_to_large() {
        assert!(Complexity::Simple < Complexity::Moderate);
        assert!(Complexity::Moderate < Complexity::Complex);
        assert!(Complexity::Complex < Complexity::Massive);
    }

    #[test]
    fn decomposition_level_parses_case_insensitively() {
        assert_eq!(
            "AGGRESSIVE".parse::<DecompositionLevel>(),
            Ok(DecompositionLevel::Aggressive)
        );
        assert_eq!(" none ".parse(), Ok(DecompositionLevel::None));
        assert!("sometimes".parse::<DecompositionLevel>().is_err());
    }

    #[test]
    fn failure_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FailureReason::MaxIterations).expect("serialize");
        assert_eq!(json, "\"max_iterations\"");
    }
}
