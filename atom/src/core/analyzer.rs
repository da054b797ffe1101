//! Heuristic task-complexity analysis.
//!
//! Decides how big a task is, whether it should be split before iterating, and
//! which review passes it warrants. Scoring is keyword- and length-based; the
//! thresholds are fixed and documented on [`TaskAnalyzer::analyze`].

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::rules::AnalyzerRules;
use crate::core::types::{Complexity, DecompositionLevel, MetaAgent, TaskAnalysis};

#[derive(Debug, Clone)]
pub struct TaskAnalyzer {
    rules: AnalyzerRules,
    level: DecompositionLevel,
    force_complex: bool,
}

impl Default for TaskAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerRules::default(), DecompositionLevel::default(), false)
    }
}

impl TaskAnalyzer {
    pub fn new(rules: AnalyzerRules, level: DecompositionLevel, force_complex: bool) -> Self {
        Self {
            rules,
            level,
            force_complex,
        }
    }

    /// Score `task`.
    ///
    /// Trivial fast path (skipped under force-complex): fillers such as
    /// `hello`, or a short request starting with a simple verb such as
    /// `print`, are SIMPLE with one iteration and nothing else.
    ///
    /// Otherwise: two or more complex keywords, or one complex plus any
    /// moderate keyword, or more than 200 characters is COMPLEX; a single
    /// complex keyword or any moderate keyword alone is MODERATE; anything
    /// else is SIMPLE.
    pub fn analyze(&self, task: &str) -> TaskAnalysis {
        if self.force_complex {
            debug!("force-complex analysis");
            return TaskAnalysis {
                complexity: Complexity::Complex,
                memory_queries: vec![self.truncated(task)],
                // Left empty so the decomposition step derives task-specific steps.
                suggested_decomposition: Vec::new(),
                meta_agents_needed: review_agents(),
                estimated_iterations: estimated_iterations(Complexity::Complex),
                needs_tests: contains(task, "test"),
                needs_docs: needs_docs(task),
                needs_review: true,
                reasoning: "force-complex mode: every task is treated as COMPLEX".to_string(),
            };
        }

        if self.is_trivial(task) {
            debug!("trivial task fast path");
            return TaskAnalysis {
                complexity: Complexity::Simple,
                memory_queries: Vec::new(),
                suggested_decomposition: Vec::new(),
                meta_agents_needed: BTreeSet::new(),
                estimated_iterations: 1,
                needs_tests: false,
                needs_docs: false,
                needs_review: false,
                reasoning: "trivial request".to_string(),
            };
        }

        let lowered = task.to_lowercase();
        let complex_hits = count_hits(&lowered, &self.rules.complex_keywords);
        let moderate_hits = count_hits(&lowered, &self.rules.moderate_keywords);
        let length = task.chars().count();

        let complexity = if complex_hits >= 2
            || (complex_hits == 1 && moderate_hits > 0)
            || length > self.rules.complex_length_chars
        {
            Complexity::Complex
        } else if complex_hits == 1 || moderate_hits > 0 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        };

        let memory_queries = if complexity >= Complexity::Moderate {
            vec![self.truncated(task)]
        } else {
            Vec::new()
        };
        let meta_agents_needed = if complexity >= Complexity::Complex {
            review_agents()
        } else {
            BTreeSet::new()
        };
        let suggested_decomposition = if complexity >= Complexity::Complex {
            generic_steps(&lowered)
        } else {
            Vec::new()
        };

        debug!(%complexity, complex_hits, moderate_hits, length, "task analyzed");
        TaskAnalysis {
            complexity,
            memory_queries,
            suggested_decomposition,
            meta_agents_needed,
            estimated_iterations: estimated_iterations(complexity),
            needs_tests: lowered.contains("test"),
            needs_docs: needs_docs(task),
            needs_review: complexity == Complexity::Complex,
            reasoning: format!(
                "{complex_hits} complex keyword(s), {moderate_hits} moderate keyword(s), \
                 {length} chars"
            ),
        }
    }

    /// Whether `analysis` warrants splitting under the configured level.
    pub fn should_decompose(&self, analysis: &TaskAnalysis) -> bool {
        should_decompose(self.level, analysis.complexity)
    }

    /// Retrieval queries for `task`, falling back to the truncated task text
    /// for anything above SIMPLE.
    pub fn get_memory_queries(&self, analysis: &TaskAnalysis, task: &str) -> Vec<String> {
        if !analysis.memory_queries.is_empty() {
            return analysis.memory_queries.clone();
        }
        if analysis.complexity != Complexity::Simple {
            return vec![self.truncated(task)];
        }
        Vec::new()
    }

    fn is_trivial(&self, task: &str) -> bool {
        let normalized = task.trim().to_lowercase();
        if normalized.chars().count() > self.rules.trivial_max_chars {
            return false;
        }
        self.rules.fillers.iter().any(|f| *f == normalized)
            || self
                .rules
                .simple_verbs
                .iter()
                .any(|verb| normalized.starts_with(verb.as_str()))
    }

    fn truncated(&self, task: &str) -> String {
        task.chars().take(self.rules.query_max_chars).collect()
    }
}

/// Decomposition policy table.
pub fn should_decompose(level: DecompositionLevel, complexity: Complexity) -> bool {
    match level {
        DecompositionLevel::None => false,
        DecompositionLevel::Light => complexity == Complexity::Massive,
        DecompositionLevel::Standard => complexity >= Complexity::Complex,
        DecompositionLevel::Aggressive => true,
    }
}

fn estimated_iterations(complexity: Complexity) -> u32 {
    match complexity {
        Complexity::Simple => 2,
        Complexity::Moderate => 5,
        Complexity::Complex => 10,
        Complexity::Massive => 20,
    }
}

fn review_agents() -> BTreeSet<MetaAgent> {
    BTreeSet::from([MetaAgent::Critic, MetaAgent::Verifier])
}

fn count_hits(lowered: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|kw| lowered.contains(kw.to_lowercase().as_str()))
        .count()
}

fn contains(task: &str, needle: &str) -> bool {
    task.to_lowercase().contains(needle)
}

fn needs_docs(task: &str) -> bool {
    let lowered = task.to_lowercase();
    lowered.contains("doc") || lowered.contains("readme")
}

fn generic_steps(lowered: &str) -> Vec<String> {
    let mut steps = vec![
        "Analyze the requirements and plan the approach".to_string(),
        "Implement the core functionality".to_string(),
    ];
    if lowered.contains("test") {
        steps.push("Write and run tests".to_string());
    }
    if lowered.contains("doc") || lowered.contains("readme") {
        steps.push("Update the documentation".to_string());
    }
    steps.push("Review and refine the result".to_string());
    steps
}
