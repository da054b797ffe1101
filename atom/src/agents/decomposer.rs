//! Planner pass that derives task-specific steps when the analysis left the
//! decomposition empty.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::types::TaskAnalysis;
use crate::io::interrupt::CancelToken;
use crate::io::invoker::AgentInvoker;
use crate::io::templates::PromptEngine;

use super::aux_request;

/// Upper bound on the number of planned steps.
pub const MAX_PLAN_STEPS: usize = 10;

static PLAN_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+(.+?)\s*$").expect("valid plan line regex")
});

/// Extract list items from planner output, in order, capped at `max_steps`.
pub fn parse_plan(text: &str, max_steps: usize) -> Vec<String> {
    text.lines()
        .filter_map(|line| PLAN_LINE_RE.captures(line))
        .map(|caps| caps[1].to_string())
        .filter(|step| !step.is_empty())
        .take(max_steps)
        .collect()
}

/// Planner agent wrapper. Does not continue any conversation.
#[derive(Debug, Clone)]
pub struct DecomposerAgent {
    max_steps: usize,
    skip_permission_prompts: bool,
}

impl DecomposerAgent {
    pub fn new(max_steps: usize, skip_permission_prompts: bool) -> Self {
        Self {
            max_steps,
            skip_permission_prompts,
        }
    }

    /// Ask the agent for a plan. A failed or empty plan yields no steps, which
    /// the caller treats as "run undecomposed".
    #[allow(clippy::too_many_arguments)]
    pub fn run<I: AgentInvoker>(
        &self,
        invoker: &I,
        engine: &PromptEngine,
        working_dir: &Path,
        system_prompt: &str,
        task: &str,
        analysis: Option<&TaskAnalysis>,
        cancel: &CancelToken,
    ) -> Result<Vec<String>> {
        let prompt = engine.render_decomposer(task, analysis, self.max_steps)?;
        let request = aux_request(
            working_dir,
            prompt,
            system_prompt,
            false,
            self.skip_permission_prompts,
        );
        let output = invoker.invoke(&request, cancel)?;
        if output.exit_status != 0 {
            warn!(exit_status = output.exit_status, "planner failed, running undecomposed");
            return Ok(Vec::new());
        }
        let steps = parse_plan(&output.raw_output, self.max_steps);
        debug!(?steps, "planner output parsed");
        info!(steps = steps.len(), "decomposition planned");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInvoker;

    #[test]
    fn parses_numbered_and_bulleted_items() {
        let text = "Here is the plan:\n1. Set up crate\n2) Write parser  \n\
                    - Add tests\n* Document\nThanks!";
        assert_eq!(
            parse_plan(text, 10),
            vec!["Set up crate", "Write parser", "Add tests", "Document"]
        );
    }

    #[test]
    fn caps_number_of_steps() {
        let text = (1..=15).map(|i| format!("{i}. step {i}\n")).collect::<String>();
        let steps = parse_plan(&text, MAX_PLAN_STEPS);
        assert_eq!(steps.len(), MAX_PLAN_STEPS);
        assert_eq!(steps[9], "step 10");
    }

    #[test]
    fn prose_without_list_yields_nothing() {
        assert!(parse_plan("I would start by looking around.", 10).is_empty());
    }

    #[test]
    fn planner_runs_fresh_and_returns_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invoker = ScriptedInvoker::new(vec![("1. design schema\n2. write migration", 0)]);
        let engine = PromptEngine::new().expect("engine");
        let steps = DecomposerAgent::new(MAX_PLAN_STEPS, true)
            .run(
                &invoker,
                &engine,
                temp.path(),
                "system",
                "migrate the database",
                None,
                &CancelToken::new(),
            )
            .expect("plan");

        assert_eq!(steps, vec!["design schema", "write migration"]);
        let calls = invoker.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].continue_conversation);
        assert!(calls[0].prompt.contains("### Planner Contract"));
        assert!(calls[0].prompt.contains("migrate the database"));
    }

    #[test]
    fn failed_planner_yields_no_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invoker = ScriptedInvoker::new(vec![("1. looks like a plan", 1)]);
        let engine = PromptEngine::new().expect("engine");
        let steps = DecomposerAgent::new(MAX_PLAN_STEPS, true)
            .run(
                &invoker,
                &engine,
                temp.path(),
                "system",
                "task",
                None,
                &CancelToken::new(),
            )
            .expect("plan");
        assert!(steps.is_empty());
    }
}
