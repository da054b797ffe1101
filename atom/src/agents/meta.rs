//! Meta-agent review passes run after the main work succeeds.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::types::MetaAgent;
use crate::io::interrupt::CancelToken;
use crate::io::invoker::AgentInvoker;
use crate::io::templates::PromptEngine;

use super::aux_request;

/// Settings shared by every review pass of a run.
#[derive(Debug, Clone)]
pub struct MetaReview<'a> {
    pub working_dir: &'a Path,
    pub system_prompt: &'a str,
    pub task: &'a str,
    pub needs_tests: bool,
    /// When off, the verifier pass is skipped.
    pub quality_check: bool,
    pub skip_permission_prompts: bool,
    pub marker: &'a str,
}

/// Passes that will actually run for `requested`, in execution order.
pub fn planned_passes(requested: &BTreeSet<MetaAgent>, quality_check: bool) -> Vec<MetaAgent> {
    requested
        .iter()
        .copied()
        .filter(|agent| quality_check || *agent != MetaAgent::Verifier)
        .collect()
}

/// Run each requested pass once, continuing the run's conversation.
///
/// A pass that exits non-zero is logged and still counted as run; only
/// missing-agent and interruption errors propagate.
pub fn run_reviews<I: AgentInvoker>(
    invoker: &I,
    engine: &PromptEngine,
    review: &MetaReview<'_>,
    requested: &BTreeSet<MetaAgent>,
    cancel: &CancelToken,
) -> Result<Vec<MetaAgent>> {
    let mut ran = Vec::new();
    for agent in planned_passes(requested, review.quality_check) {
        cancel.check()?;
        let prompt =
            engine.render_meta_review(agent, review.task, review.needs_tests, review.marker)?;
        let request = aux_request(
            review.working_dir,
            prompt,
            review.system_prompt,
            true,
            review.skip_permission_prompts,
        );
        let output = invoker.invoke(&request, cancel)?;
        if output.exit_status == 0 {
            info!(agent = agent.as_str(), "meta-agent pass finished");
        } else {
            warn!(
                agent = agent.as_str(),
                exit_status = output.exit_status,
                "meta-agent pass failed"
            );
        }
        ran.push(agent);
    }
    Ok(ran)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInvoker;

    fn both() -> BTreeSet<MetaAgent> {
        BTreeSet::from([MetaAgent::Verifier, MetaAgent::Critic])
    }

    #[test]
    fn critic_runs_before_verifier() {
        assert_eq!(
            planned_passes(&both(), true),
            vec![MetaAgent::Critic, MetaAgent::Verifier]
        );
    }

    #[test]
    fn quality_check_off_skips_verifier() {
        assert_eq!(planned_passes(&both(), false), vec![MetaAgent::Critic]);
    }

    #[test]
    fn reviews_continue_conversation_and_tolerate_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invoker = ScriptedInvoker::new(vec![("found issues", 1), ("all green", 0)]);
        let engine = PromptEngine::new().expect("engine");
        let review = MetaReview {
            working_dir: temp.path(),
            system_prompt: "system",
            task: "build it",
            needs_tests: false,
            quality_check: true,
            skip_permission_prompts: true,
            marker: "EXIT_LOOP_NOW",
        };

        let ran = run_reviews(&invoker, &engine, &review, &both(), &CancelToken::new())
            .expect("reviews");

        assert_eq!(ran, vec![MetaAgent::Critic, MetaAgent::Verifier]);
        let calls = invoker.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.continue_conversation));
        assert!(calls[0].prompt.contains("Critic Pass"));
        assert!(calls[1].prompt.contains("Verifier Pass"));
    }
}
