//! Test-only doubles for the agent, the sleeper and the retrieval backend,
//! plus a temp workspace with a prompt directory.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::error::AtomError;
use crate::io::interrupt::{CancelToken, Sleeper};
use crate::io::invoker::{AgentInvoker, InvokeOutput, InvokeRequest};
use crate::io::memory::{MemoryBackend, MemoryDocument};
use crate::io::prompt::PromptComposer;

/// One queued agent response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Output(InvokeOutput),
    AgentNotFound,
}

/// Invoker that replays queued responses and records every request.
///
/// With a fallback set, an exhausted queue keeps returning it.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    queue: RefCell<VecDeque<ScriptedResponse>>,
    fallback: Option<InvokeOutput>,
    calls: RefCell<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new(outputs: Vec<(&str, i32)>) -> Self {
        Self::from_responses(
            outputs
                .into_iter()
                .map(|(text, exit_status)| ScriptedResponse::Output(output(text, exit_status)))
                .collect(),
        )
    }

    pub fn from_responses(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            queue: RefCell::new(responses.into()),
            fallback: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Always answer with the same output.
    pub fn repeating(text: &str, exit_status: i32) -> Self {
        Self {
            fallback: Some(output(text, exit_status)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.borrow().clone()
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest, cancel: &CancelToken) -> Result<InvokeOutput> {
        cancel.check()?;
        self.calls.borrow_mut().push(request.clone());
        match self.queue.borrow_mut().pop_front() {
            Some(ScriptedResponse::Output(out)) => Ok(out),
            Some(ScriptedResponse::AgentNotFound) => {
                Err(AtomError::AgentNotFound("scripted".to_string()).into())
            }
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("scripted invoker exhausted")),
        }
    }
}

pub fn output(text: &str, exit_status: i32) -> InvokeOutput {
    InvokeOutput {
        raw_output: text.to_string(),
        exit_status,
    }
}

/// Sleeper that records requested waits instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        self.waits.borrow_mut().push(duration);
        Ok(())
    }
}

/// Retrieval backend with fixed hits; records queries.
#[derive(Debug, Default)]
pub struct StaticMemory {
    docs: Vec<MemoryDocument>,
    queries: RefCell<Vec<String>>,
}

impl StaticMemory {
    pub fn new(docs: Vec<MemoryDocument>) -> Self {
        Self {
            docs,
            queries: RefCell::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl MemoryBackend for StaticMemory {
    fn query(&self, query: &str, cancel: &CancelToken) -> Result<Vec<MemoryDocument>> {
        cancel.check()?;
        self.queries.borrow_mut().push(query.to_string());
        Ok(self.docs.clone())
    }
}

/// Temp working directory plus a prompt directory holding an `ATOM` fragment.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let ws = Self {
            temp: tempfile::tempdir()?,
        };
        fs::create_dir_all(ws.workdir())?;
        ws.write_fragment("ATOM", "You are atom. Print EXIT_LOOP_NOW when the task is done.")?;
        Ok(ws)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn workdir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.temp.path().join("prompts")
    }

    pub fn write_fragment(&self, name: &str, contents: &str) -> Result<()> {
        let dir = self.prompts_dir();
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{name}.md")), contents)?;
        Ok(())
    }

    pub fn composer(&self) -> PromptComposer {
        PromptComposer::from_dirs(vec![self.prompts_dir()])
    }
}
