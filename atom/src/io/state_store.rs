//! Explicit key-value state that outlives a single run.
//!
//! Counters such as `runs_started` live behind [`StateStore`] and are handed to
//! the runtime by the caller; nothing here is process-global.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Increment an integer counter (missing or non-integer counts as 0).
    fn increment(&self, key: &str) -> Result<u64> {
        let current = self.get(key)?.and_then(|v| v.as_u64()).unwrap_or(0);
        let next = current + 1;
        self.set(key, Value::from(next))?;
        Ok(next)
    }
}

/// In-process store, for tests and ephemeral callers.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RefCell<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object file, rewritten atomically on every set.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read state {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", self.path.display()))
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.load()?;
        values.insert(key.to_string(), value);
        let mut buf = serde_json::to_string_pretty(&values)?;
        buf.push('\n');
        debug!(path = %self.path.display(), key, "writing state");
        write_atomic(&self.path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
