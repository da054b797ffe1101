//! Retrieval-augmented context injection.
//!
//! The retrieval backend is an external capability behind [`MemoryBackend`].
//! [`MemoryGate`] asks it once per call and prepends a context block to the
//! system prompt only when the best hit clears the relevance threshold.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::io::interrupt::CancelToken;
use crate::io::process::run_command;
use crate::io::templates::{MemoryDocContext, PromptEngine};

/// Default relevance threshold for injecting context.
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// One document returned by the retrieval backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryDocument {
    pub content: String,
    #[serde(default)]
    pub source: String,
    /// Relevance score in `[0, 1]`.
    pub relevance: f64,
}

/// Read-only retrieval capability.
///
/// Implementations that block must honor `cancel` and fail with
/// [`AtomError::Interrupted`](crate::error::AtomError::Interrupted).
pub trait MemoryBackend {
    fn query(&self, query: &str, cancel: &CancelToken) -> Result<Vec<MemoryDocument>>;
}

/// Backend that runs an external command with the query on stdin and reads a
/// JSON array of [`MemoryDocument`] from stdout.
#[derive(Debug, Clone)]
pub struct CommandMemoryBackend {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandMemoryBackend {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("memory command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }
}

impl MemoryBackend for CommandMemoryBackend {
    fn query(&self, query: &str, cancel: &CancelToken) -> Result<Vec<MemoryDocument>> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        let output = run_command(
            cmd,
            Some(query.as_bytes()),
            Some(self.timeout),
            self.output_limit_bytes,
            cancel,
        )
        .context("run memory command")?;
        if output.timed_out {
            return Err(anyhow!("memory command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "memory command failed with status {:?}",
                output.status.code()
            ));
        }
        let docs: Vec<MemoryDocument> =
            serde_json::from_slice(&output.stdout).context("parse memory command output")?;
        Ok(docs)
    }
}

/// Threshold gate in front of a [`MemoryBackend`].
pub struct MemoryGate<'a> {
    backend: &'a dyn MemoryBackend,
    threshold: f64,
    engine: PromptEngine,
}

impl<'a> MemoryGate<'a> {
    pub fn new(backend: &'a dyn MemoryBackend, threshold: f64) -> Result<Self> {
        Ok(Self {
            backend,
            threshold,
            engine: PromptEngine::new()?,
        })
    }

    /// Prepend relevant memory to `system_prompt`, or return it unchanged.
    pub fn enhance(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut docs = self.backend.query(user_prompt, cancel)?;
        docs.retain(|d| d.relevance.is_finite());
        docs.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let best = docs.first().map(|d| d.relevance);
        match best {
            Some(score) if score >= self.threshold => {
                info!(best = score, hits = docs.len(), "injecting memory context");
                let shown: Vec<MemoryDocContext> = docs
                    .iter()
                    .filter(|d| d.relevance >= self.threshold)
                    .map(|d| MemoryDocContext {
                        relevance: format!("{:.2}", d.relevance),
                        source: if d.source.is_empty() {
                            "unknown".to_string()
                        } else {
                            d.source.clone()
                        },
                        content: d.content.clone(),
                    })
                    .collect();
                let block = self.engine.render_memory_context(&shown)?;
                Ok(format!("{block}\n\n{system_prompt}"))
            }
            _ => {
                debug!(best = ?best, threshold = self.threshold, "memory below threshold");
                Ok(system_prompt.to_string())
            }
        }
    }
}
