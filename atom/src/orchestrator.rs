//! The run state machine: INIT → ANALYZING → (DECOMPOSING) → ITERATING →
//! SUCCEEDED | FAILED.
//!
//! One [`AtomRuntime::run`] call owns its ledger, analysis and attempt
//! counters; nothing is shared between runs except what the caller injects
//! (invoker, sleeper, optional memory backend and state store). Iterations
//! within a run are strictly sequential.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agents::decomposer::{DecomposerAgent, MAX_PLAN_STEPS};
use crate::agents::meta::{MetaReview, run_reviews};
use crate::core::analyzer::TaskAnalyzer;
use crate::core::classifier::{Classifier, RetryManager};
use crate::core::types::{
    DecompositionProgress, FailureReason, MetaAgent, RunResult, TaskAnalysis,
};
use crate::error::failure_reason;
use crate::io::config::{AtomConfig, RuleSet};
use crate::io::interrupt::{CancelToken, Sleeper};
use crate::io::invoker::{AgentInvoker, InvokeRequest, ensure_working_dir};
use crate::io::ledger::IterationLedger;
use crate::io::memory::{MemoryBackend, MemoryGate};
use crate::io::prompt::PromptComposer;
use crate::io::state_store::StateStore;
use crate::io::task_file::{remove_task_file, write_task_file};
use crate::io::templates::PromptEngine;

/// Literal the agent prints to signal completion. Matched case-sensitively.
pub const TERMINATION_MARKER: &str = "EXIT_LOOP_NOW";

/// Prompt sent on every iteration after the first of a (sub-)run.
pub const CONTINUE_PROMPT: &str = "Continue working on the task. \
    When it is fully complete, print EXIT_LOOP_NOW on its own line.";

/// State machine phases, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Analyzing,
    Decomposing,
    Iterating,
    Succeeded,
    Failed,
}

/// How an ITERATING loop ended when it did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopEnd {
    Terminated,
    MaxIterations,
}

/// Mutable bookkeeping for one run.
#[derive(Debug, Default)]
struct RunProgress {
    ledger: IterationLedger,
    analysis: Option<TaskAnalysis>,
    decomposition: Option<DecompositionProgress>,
    meta_agents_run: Option<Vec<MetaAgent>>,
    marker_written: bool,
}

/// Shared retry notification sink.
pub type SharedNotifier = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// The orchestrator. Cheap to share: `run` takes `&self`.
pub struct AtomRuntime<'a, I: AgentInvoker, S: Sleeper> {
    invoker: &'a I,
    sleeper: &'a S,
    config: AtomConfig,
    composer: PromptComposer,
    analyzer: TaskAnalyzer,
    classifier: Classifier,
    engine: PromptEngine,
    memory: Option<&'a dyn MemoryBackend>,
    state: Option<&'a dyn StateStore>,
    cancel: CancelToken,
    notifier: SharedNotifier,
}

impl<'a, I: AgentInvoker, S: Sleeper> AtomRuntime<'a, I, S> {
    pub fn new(
        config: AtomConfig,
        rules: RuleSet,
        composer: PromptComposer,
        invoker: &'a I,
        sleeper: &'a S,
    ) -> Result<Self> {
        config.validate()?;
        let analyzer = TaskAnalyzer::new(
            rules.analyzer,
            config.decomposition_level,
            config.force_complex,
        );
        Ok(Self {
            invoker,
            sleeper,
            analyzer,
            classifier: Classifier::new(rules.classifier)?,
            engine: PromptEngine::new()?,
            composer,
            config,
            memory: None,
            state: None,
            cancel: CancelToken::new(),
            notifier: Arc::new(|message: &str, wait: Duration| {
                warn!(wait_secs = wait.as_secs(), "{message}");
            }),
        })
    }

    pub fn with_memory(mut self, backend: &'a dyn MemoryBackend) -> Self {
        self.memory = Some(backend);
        self
    }

    pub fn with_state_store(mut self, store: &'a dyn StateStore) -> Self {
        self.state = Some(store);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Execute one run of `task` in `working_dir`.
    ///
    /// Never panics on agent behavior; every outcome is a [`RunResult`] whose
    /// `reason` is set on failure.
    pub fn run(&self, task: &str, working_dir: &Path) -> RunResult {
        let started = Instant::now();
        let mut progress = RunProgress::default();
        if self.config.ledger_log {
            let mirror = IterationLedger::mirror_path(working_dir);
            progress.ledger = IterationLedger::with_mirror(mirror);
        }

        let outcome = self.run_phases(task, working_dir, &mut progress);

        if progress.marker_written
            && self.config.cleanup
            && let Err(err) = remove_task_file(working_dir)
        {
            warn!(err = %err, "failed to remove task file");
        }

        let (success, reason, error) = match outcome {
            Ok(LoopEnd::Terminated) => (true, None, None),
            Ok(LoopEnd::MaxIterations) => (
                false,
                Some(FailureReason::MaxIterations),
                Some(format!(
                    "reached max_iterations ({}) without {TERMINATION_MARKER}",
                    self.config.max_iterations
                )),
            ),
            Err(err) => {
                let reason = failure_reason(&err).unwrap_or(FailureReason::RuntimeError);
                (false, Some(reason), Some(format!("{err:#}")))
            }
        };

        let phase = if success {
            RunPhase::Succeeded
        } else {
            RunPhase::Failed
        };
        let iterations = u32::try_from(progress.ledger.len()).unwrap_or(u32::MAX);
        info!(?phase, ?reason, iterations, "run finished");
        if progress.marker_written {
            let reason_value = reason
                .and_then(|r| serde_json::to_value(r).ok())
                .unwrap_or(Value::Null);
            self.record_state("last_reason", reason_value);
        }

        RunResult {
            success,
            iterations,
            output: progress.ledger.last_output().unwrap_or_default().to_string(),
            duration: started.elapsed().as_secs_f64(),
            reason,
            error,
            task_analysis: progress.analysis,
            decomposition: progress.decomposition,
            meta_agents_run: progress.meta_agents_run,
            iteration_records: progress.ledger.all().to_vec(),
        }
    }

    fn run_phases(
        &self,
        task: &str,
        working_dir: &Path,
        progress: &mut RunProgress,
    ) -> Result<LoopEnd> {
        ensure_working_dir(working_dir)?;
        self.cancel.check()?;

        debug!(phase = ?RunPhase::Init, "entering phase");
        write_task_file(working_dir, task)?;
        progress.marker_written = true;
        self.record_counter("runs_started");
        let mut system_prompt = self.composer.compose(self.config.tool_name.as_deref())?;

        debug!(phase = ?RunPhase::Analyzing, "entering phase");
        let analysis = self
            .config
            .use_task_analyzer
            .then(|| self.analyzer.analyze(task));
        if let Some(analysis) = &analysis {
            info!(
                complexity = %analysis.complexity,
                estimated_iterations = analysis.estimated_iterations,
                "task analyzed"
            );
        }
        progress.analysis = analysis.clone();

        system_prompt = self.enhance_with_memory(system_prompt, task, analysis.as_ref())?;

        let steps = match &analysis {
            Some(a) if self.analyzer.should_decompose(a) => {
                debug!(phase = ?RunPhase::Decomposing, "entering phase");
                self.plan_steps(working_dir, &system_prompt, task, a)?
            }
            _ => Vec::new(),
        };

        let end = if steps.is_empty() {
            self.iterate(working_dir, &system_prompt, task, progress)?
        } else {
            self.iterate_steps(working_dir, &system_prompt, task, steps, progress)?
        };

        if end == LoopEnd::Terminated
            && self.config.use_meta_agents
            && let Some(analysis) = &analysis
            && !analysis.meta_agents_needed.is_empty()
        {
            let review = MetaReview {
                working_dir,
                system_prompt: &system_prompt,
                task,
                needs_tests: analysis.needs_tests,
                quality_check: self.config.quality_check,
                skip_permission_prompts: self.config.skip_permissions,
                marker: TERMINATION_MARKER,
            };
            let ran = run_reviews(
                self.invoker,
                &self.engine,
                &review,
                &analysis.meta_agents_needed,
                &self.cancel,
            )?;
            progress.meta_agents_run = Some(ran);
        }

        Ok(end)
    }

    /// Memory is used when explicitly enabled, or when auto-detecting and a
    /// backend was supplied. Retrieval failures leave the prompt unchanged.
    fn enhance_with_memory(
        &self,
        system_prompt: String,
        task: &str,
        analysis: Option<&TaskAnalysis>,
    ) -> Result<String> {
        let wanted = self.config.use_memory.unwrap_or(self.memory.is_some());
        if !wanted {
            return Ok(system_prompt);
        }
        let Some(backend) = self.memory else {
            warn!("use_memory is on but no memory backend is configured");
            return Ok(system_prompt);
        };

        let query = analysis
            .and_then(|a| self.analyzer.get_memory_queries(a, task).into_iter().next())
            .unwrap_or_else(|| task.to_string());
        let gate = MemoryGate::new(backend, self.config.memory_threshold)?;
        match gate.enhance(&system_prompt, &query, &self.cancel) {
            Ok(enhanced) => Ok(enhanced),
            Err(err) if failure_reason(&err) == Some(FailureReason::Interrupted) => Err(err),
            Err(err) => {
                warn!(err = %err, "memory retrieval failed, continuing without context");
                Ok(system_prompt)
            }
        }
    }

    fn plan_steps(
        &self,
        working_dir: &Path,
        system_prompt: &str,
        task: &str,
        analysis: &TaskAnalysis,
    ) -> Result<Vec<String>> {
        if !analysis.suggested_decomposition.is_empty() {
            return Ok(analysis.suggested_decomposition.clone());
        }
        DecomposerAgent::new(MAX_PLAN_STEPS, self.config.skip_permissions).run(
            self.invoker,
            &self.engine,
            working_dir,
            system_prompt,
            task,
            Some(analysis),
            &self.cancel,
        )
    }

    /// Run each step as its own sub-run. Stops at the first step that does not
    /// terminate, returning that step's outcome.
    fn iterate_steps(
        &self,
        working_dir: &Path,
        system_prompt: &str,
        task: &str,
        steps: Vec<String>,
        progress: &mut RunProgress,
    ) -> Result<LoopEnd> {
        info!(steps = steps.len(), "running decomposed task");
        progress.decomposition = Some(DecompositionProgress {
            steps: steps.clone(),
            completed: 0,
        });

        for (index, step) in steps.iter().enumerate() {
            let completed = &steps[..index];
            let prompt = self.engine.render_step(
                task,
                step,
                index + 1,
                steps.len(),
                completed,
                TERMINATION_MARKER,
            )?;
            debug!(step = index + 1, "starting step");
            let end = self.iterate(working_dir, system_prompt, &prompt, progress)?;
            if end != LoopEnd::Terminated {
                warn!(step = index + 1, "step did not complete");
                return Ok(end);
            }
            if let Some(decomposition) = progress.decomposition.as_mut() {
                decomposition.completed = index + 1;
            }
        }
        Ok(LoopEnd::Terminated)
    }

    /// The ITERATING loop for one (sub-)run.
    fn iterate(
        &self,
        working_dir: &Path,
        system_prompt: &str,
        prompt: &str,
        progress: &mut RunProgress,
    ) -> Result<LoopEnd> {
        debug!(phase = ?RunPhase::Iterating, "entering phase");
        let notifier = Arc::clone(&self.notifier);
        let mut retry = RetryManager::new(
            self.classifier.clone(),
            Box::new(move |message: &str, wait: Duration| notifier(message, wait)),
        );
        let mut attempt = 1u32;

        for iteration in 1..=self.config.max_iterations {
            self.cancel.check()?;
            let first = iteration == 1;
            let request = InvokeRequest {
                working_dir: working_dir.to_path_buf(),
                prompt: if first {
                    prompt.to_string()
                } else {
                    CONTINUE_PROMPT.to_string()
                },
                system_prompt: Some(system_prompt.to_string()),
                continue_conversation: !first,
                skip_permission_prompts: self.config.skip_permissions,
            };

            let output = self.invoker.invoke(&request, &self.cancel)?;
            // An interrupt that reached the child shows up as an ordinary exit.
            self.cancel.check()?;
            let record_number = u32::try_from(progress.ledger.len() + 1).unwrap_or(u32::MAX);
            progress.ledger.add(record_number, &output);
            debug!(
                iteration,
                exit_status = output.exit_status,
                bytes = output.raw_output.len(),
                "iteration recorded"
            );

            if output.raw_output.contains(TERMINATION_MARKER) {
                info!(iteration, "termination marker seen");
                return Ok(LoopEnd::Terminated);
            }
            if iteration >= self.config.max_iterations {
                break;
            }

            let decision = retry.check(&output.raw_output, output.exit_status, attempt);
            if decision.should_retry {
                self.sleeper.sleep(decision.wait, &self.cancel)?;
                attempt += 1;
            }
        }

        warn!(max_iterations = self.config.max_iterations, "iteration cap reached");
        Ok(LoopEnd::MaxIterations)
    }

    fn record_counter(&self, key: &str) {
        if let Some(store) = self.state
            && let Err(err) = store.increment(key)
        {
            warn!(err = %err, key, "failed to update state store");
        }
    }

    fn record_state(&self, key: &str, value: Value) {
        if let Some(store) = self.state
            && let Err(err) = store.set(key, value)
        {
            warn!(err = %err, key, "failed to update state store");
        }
    }
}
