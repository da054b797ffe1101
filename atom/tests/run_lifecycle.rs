//! End-to-end run scenarios through the public runtime API.
//!
//! These drive `AtomRuntime::run` with a scripted agent to verify termination,
//! the iteration cap, retry waits, task marker lifecycle and fatal errors.

use std::cell::RefCell;
use std::fs;
use std::time::Duration;

use anyhow::Result;
use atom::core::types::{Complexity, FailureReason, MetaAgent};
use atom::io::config::{AtomConfig, RuleSet};
use atom::io::interrupt::{CancelToken, Sleeper};
use atom::io::ledger::IterationLedger;
use atom::io::task_file::task_file_path;
use atom::orchestrator::AtomRuntime;
use atom::test_support::{
    RecordingSleeper, ScriptedInvoker, ScriptedResponse, TestWorkspace,
};

const TASK: &str = "rename the variable foo to bar please";

fn config(max_iterations: u32) -> AtomConfig {
    AtomConfig {
        max_iterations,
        ..AtomConfig::default()
    }
}

/// Agent never prints the marker: the run stops at the cap.
#[test]
fn never_terminating_agent_hits_iteration_cap() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::repeating("Still working...", 0);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(3), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(TASK, &ws.workdir());

    assert!(!result.success);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.reason, Some(FailureReason::MaxIterations));
    assert_eq!(result.output, "Still working...");
    assert!(result.duration >= 0.0);
    assert_eq!(invoker.calls().len(), 3);
    // Exit 0 without marker is Success: no waits.
    assert!(sleeper.waits().is_empty());
}

/// Marker on the third call ends the run successfully and removes the marker file.
#[test]
fn marker_on_third_call_succeeds_and_cleans_up() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::new(vec![
        ("Working on it", 0),
        ("Almost there", 0),
        ("All done. EXIT_LOOP_NOW", 0),
    ]);
    let sleeper = RecordingSleeper::new();
    let runtime =
        AtomRuntime::new(config(25), RuleSet::default(), ws.composer(), &invoker, &sleeper)
            .expect("runtime");

    let result = runtime.run(TASK, &ws.workdir());

    assert!(result.success);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.reason, None);
    assert_eq!(result.error, None);
    assert!(!task_file_path(&ws.workdir()).exists());

    let analysis = result.task_analysis.expect("analysis");
    assert_eq!(analysis.complexity, Complexity::Simple);
    assert_eq!(result.meta_agents_run, None);

    let ledger = fs::read_to_string(IterationLedger::mirror_path(&ws.workdir())).expect("ledger");
    let iterations: Vec<u64> = ledger
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["iteration"].as_u64().expect("iteration")
        })
        .collect();
    assert_eq!(iterations, vec![1, 2, 3]);

    let outputs: Vec<&str> = result
        .iteration_records
        .iter()
        .map(|r| r.raw_output.as_str())
        .collect();
    assert_eq!(outputs, vec!["Working on it", "Almost there", "All done. EXIT_LOOP_NOW"]);
}

/// Ctrl-C handler firing while the loop waits out a rate limit.
struct CtrlCDuringWait {
    cancel: CancelToken,
    waits: RefCell<Vec<Duration>>,
}

impl Sleeper for CtrlCDuringWait {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        self.waits.borrow_mut().push(duration);
        self.cancel.cancel();
        cancel.check()
    }
}

#[test]
fn ctrl_c_during_rate_limit_wait_interrupts_the_run() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::repeating("Error: rate limit exceeded", 1);
    let cancel = CancelToken::new();
    let sleeper = CtrlCDuringWait {
        cancel: cancel.clone(),
        waits: RefCell::new(Vec::new()),
    };
    let runtime = AtomRuntime::new(config(5), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime")
        .with_cancel(cancel);

    let result = runtime.run(TASK, &ws.workdir());

    assert!(!result.success);
    assert_eq!(result.reason, Some(FailureReason::Interrupted));
    assert_eq!(sleeper.waits.borrow().len(), 1);
    assert_eq!(invoker.calls().len(), 1);
    assert_eq!(result.iteration_records.len(), 1);
    assert!(!task_file_path(&ws.workdir()).exists());
}

#[test]
fn cleanup_off_keeps_marker_file() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::new(vec![("EXIT_LOOP_NOW", 0)]);
    let sleeper = RecordingSleeper::new();
    let cfg = AtomConfig {
        cleanup: false,
        ..config(5)
    };
    let runtime = AtomRuntime::new(cfg, RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    assert!(runtime.run(TASK, &ws.workdir()).success);
    assert_eq!(
        fs::read_to_string(task_file_path(&ws.workdir())).expect("marker"),
        TASK
    );
}

#[test]
fn cleanup_runs_on_failure_too() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::repeating("nope", 0);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(1), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(TASK, &ws.workdir());
    assert_eq!(result.reason, Some(FailureReason::MaxIterations));
    assert!(!task_file_path(&ws.workdir()).exists());
}

/// Session limit with an epoch reset in the past waits exactly the buffer.
#[test]
fn session_limit_waits_then_resumes() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::new(vec![
        ("Usage limit reached|1000000000", 1),
        ("EXIT_LOOP_NOW", 0),
    ]);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(5), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(TASK, &ws.workdir());

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(300)]);
    assert!(invoker.calls()[1].continue_conversation);
}

#[test]
fn missing_agent_fails_without_retry() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::from_responses(vec![ScriptedResponse::AgentNotFound]);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(5), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(TASK, &ws.workdir());

    assert!(!result.success);
    assert_eq!(result.reason, Some(FailureReason::AgentNotFound));
    assert!(sleeper.waits().is_empty());
    assert!(!task_file_path(&ws.workdir()).exists());
}

#[test]
fn missing_working_directory_is_reported() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::repeating("EXIT_LOOP_NOW", 0);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(5), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(TASK, &ws.path().join("does-not-exist"));

    assert_eq!(result.reason, Some(FailureReason::DirectoryNotFound));
    assert_eq!(result.iterations, 0);
    assert!(invoker.calls().is_empty());
}

/// Complex task: generic steps run one by one, then critic and verifier.
#[test]
fn complex_task_decomposes_and_reviews() {
    let ws = TestWorkspace::new().expect("ws");
    let task = "implement a build system and test it";
    let invoker = ScriptedInvoker::new(vec![
        ("plan ready EXIT_LOOP_NOW", 0),
        ("core done EXIT_LOOP_NOW", 0),
        ("tests pass EXIT_LOOP_NOW", 0),
        ("refined EXIT_LOOP_NOW", 0),
        ("critique", 0),
        ("verified", 0),
    ]);
    let sleeper = RecordingSleeper::new();
    let runtime = AtomRuntime::new(config(5), RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run(task, &ws.workdir());

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.iterations, 4);
    let decomposition = result.decomposition.expect("decomposition");
    assert_eq!(decomposition.steps.len(), 4);
    assert_eq!(decomposition.completed, 4);
    assert_eq!(
        result.meta_agents_run,
        Some(vec![MetaAgent::Critic, MetaAgent::Verifier])
    );

    let calls = invoker.calls();
    assert_eq!(calls.len(), 6);
    assert!(calls[4].continue_conversation);
    assert!(calls[4].prompt.contains("Critic Pass"));
    assert!(calls[5].prompt.contains("Verifier Pass"));
}

#[test]
fn quality_check_off_skips_verifier() {
    let ws = TestWorkspace::new().expect("ws");
    let invoker = ScriptedInvoker::new(vec![
        ("EXIT_LOOP_NOW", 0),
        ("EXIT_LOOP_NOW", 0),
        ("EXIT_LOOP_NOW", 0),
        ("critique", 0),
    ]);
    let sleeper = RecordingSleeper::new();
    let cfg = AtomConfig {
        quality_check: false,
        ..config(5)
    };
    let runtime = AtomRuntime::new(cfg, RuleSet::default(), ws.composer(), &invoker, &sleeper)
        .expect("runtime");

    let result = runtime.run("implement a build system", &ws.workdir());

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.meta_agents_run, Some(vec![MetaAgent::Critic]));
    assert_eq!(invoker.calls().len(), 4);
}
