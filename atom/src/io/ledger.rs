//! Append-only record of iteration results for one run.
//!
//! The in-memory ledger is authoritative. When a mirror path is set, each
//! record is also appended as one JSON line (`.atom/iterations.jsonl`) for
//! debugging; mirror failures are logged and never fail the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use crate::core::types::IterationRecord;
use crate::io::invoker::InvokeOutput;

#[derive(Debug, Default)]
pub struct IterationLedger {
    records: Vec<IterationRecord>,
    mirror: Option<PathBuf>,
}

impl IterationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that also appends each record to `path` as JSON lines.
    pub fn with_mirror(path: impl Into<PathBuf>) -> Self {
        Self {
            records: Vec::new(),
            mirror: Some(path.into()),
        }
    }

    /// Default mirror location inside a working directory.
    pub fn mirror_path(working_dir: &Path) -> PathBuf {
        working_dir.join(".atom").join("iterations.jsonl")
    }

    pub fn add(&mut self, iteration: u32, result: &InvokeOutput) -> &IterationRecord {
        let record = IterationRecord {
            iteration,
            raw_output: result.raw_output.clone(),
            exit_status: result.exit_status,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        };
        if let Some(path) = &self.mirror
            && let Err(err) = append_json_line(path, &record)
        {
            warn!(err = %err, path = %path.display(), "failed to mirror iteration record");
        }
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Records in insertion order.
    pub fn all(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Output of the most recent record, if any.
    pub fn last_output(&self) -> Option<&str> {
        self.records.last().map(|r| r.raw_output.as_str())
    }
}

fn append_json_line(path: &Path, record: &IterationRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create ledger dir {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize iteration record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
