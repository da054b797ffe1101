//! Runtime configuration (TOML) and rule-table loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::rules::{AnalyzerRules, ClassifierRules};
use crate::core::types::DecompositionLevel;
use crate::io::memory::DEFAULT_THRESHOLD;

/// Runtime configuration.
///
/// This file is intended to be edited by humans. Missing fields default to
/// the documented values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtomConfig {
    /// Iteration cap per run (and per decomposition step).
    pub max_iterations: u32,
    pub decomposition_level: DecompositionLevel,
    /// Treat every task as COMPLEX.
    pub force_complex: bool,
    /// When off, every task is iterated as-is without analysis.
    pub use_task_analyzer: bool,
    pub use_meta_agents: bool,
    /// Run the verifier pass after success.
    pub quality_check: bool,
    /// `None` auto-detects: memory is used iff a backend is available.
    pub use_memory: Option<bool>,
    pub memory_threshold: f64,
    pub verbose: bool,
    /// Delete the task marker when the run finishes.
    pub cleanup: bool,

    /// Agent executable name or path.
    pub agent_program: String,
    /// Per-invocation timeout in seconds; 0 waits indefinitely.
    pub agent_timeout_secs: u64,
    /// Bytes of agent stdout kept per invocation.
    pub output_limit_bytes: usize,
    /// Pass the permission-bypass flag to the agent.
    pub skip_permissions: bool,
    /// Tool whose prompt fragments are composed (see prompt composition).
    pub tool_name: Option<String>,
    /// Bundled prompt directory searched after the local and global ones.
    pub bundled_prompts_dir: Option<PathBuf>,
    /// Mirror the iteration ledger to `.atom/iterations.jsonl`.
    pub ledger_log: bool,
    /// Optional TOML file with `[classifier]` and `[analyzer]` rule tables.
    pub rules_path: Option<PathBuf>,
    /// Command for the retrieval backend (`["atom-memory", "query"]`).
    pub memory_command: Vec<String>,
}

impl Default for AtomConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            decomposition_level: DecompositionLevel::Standard,
            force_complex: false,
            use_task_analyzer: true,
            use_meta_agents: true,
            quality_check: true,
            use_memory: None,
            memory_threshold: DEFAULT_THRESHOLD,
            verbose: false,
            cleanup: true,
            agent_program: "claude".to_string(),
            agent_timeout_secs: 0,
            output_limit_bytes: 1_000_000,
            skip_permissions: true,
            tool_name: None,
            bundled_prompts_dir: None,
            ledger_log: true,
            rules_path: None,
            memory_command: Vec::new(),
        }
    }
}

impl AtomConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(anyhow!("memory_threshold must be within [0, 1]"));
        }
        if self.agent_program.trim().is_empty() {
            return Err(anyhow!("agent_program must be non-empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.memory_command.first().is_some_and(|p| p.trim().is_empty()) {
            return Err(anyhow!("memory_command must start with a program"));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        (self.agent_timeout_secs > 0).then(|| Duration::from_secs(self.agent_timeout_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AtomConfig::default()`.
pub fn load_config(path: &Path) -> Result<AtomConfig> {
    if !path.exists() {
        let cfg = AtomConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AtomConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Rule tables loaded from a rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuleSet {
    pub classifier: ClassifierRules,
    pub analyzer: AnalyzerRules,
}

/// Load rule tables; `None` yields the built-in defaults.
pub fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    let Some(path) = path else {
        return Ok(RuleSet::default());
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
