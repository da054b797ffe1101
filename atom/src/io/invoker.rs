//! Agent invocation abstraction.
//!
//! The [`AgentInvoker`] trait reduces the external agent to `(text, exit
//! status)`. The orchestrator never sees subprocess plumbing; tests use
//! scripted invokers that return queued outputs without spawning processes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::AtomError;
use crate::io::interrupt::CancelToken;
use crate::io::process::run_command;

/// Exit status reported when the agent was killed by the timeout.
pub const TIMEOUT_EXIT_STATUS: i32 = 124;
/// Exit status reported when the agent died without an exit code (signal).
pub const SIGNALED_EXIT_STATUS: i32 = -1;

/// Parameters for one agent call.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Working directory for the agent process. Must exist.
    pub working_dir: PathBuf,
    /// Full prompt text.
    pub prompt: String,
    /// System prompt to append; sent only when starting a conversation.
    pub system_prompt: Option<String>,
    /// Continue the previous conversation in `working_dir`.
    pub continue_conversation: bool,
    /// Bypass interactive permission prompts.
    pub skip_permission_prompts: bool,
}

/// Raw result of one agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutput {
    pub raw_output: String,
    pub exit_status: i32,
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    /// Run the agent once and block until it exits.
    ///
    /// A missing executable is [`AtomError::AgentNotFound`]; a missing working
    /// directory is [`AtomError::DirectoryNotFound`]. Any non-zero exit is data.
    fn invoke(&self, request: &InvokeRequest, cancel: &CancelToken) -> Result<InvokeOutput>;
}

/// Fail with [`AtomError::DirectoryNotFound`] unless `dir` is an existing directory.
pub fn ensure_working_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(AtomError::DirectoryNotFound(dir.to_path_buf()).into());
    }
    Ok(())
}

/// Invoker that spawns a CLI agent (`claude` by default).
#[derive(Debug, Clone)]
pub struct CliInvoker {
    program: String,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl CliInvoker {
    pub fn new(
        program: impl Into<String>,
        timeout: Option<Duration>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            program: program.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Build argv for `request`: `[-c] -p <prompt> [--append-system-prompt <s>]
    /// [--dangerously-skip-permissions]`.
    pub fn build_command(&self, request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        if request.continue_conversation {
            cmd.arg("-c");
        }
        cmd.arg("-p").arg(&request.prompt);
        if let Some(system) = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty() && !request.continue_conversation)
        {
            cmd.arg("--append-system-prompt").arg(system);
        }
        if request.skip_permission_prompts {
            cmd.arg("--dangerously-skip-permissions");
        }
        cmd.current_dir(&request.working_dir);
        cmd
    }
}

impl AgentInvoker for CliInvoker {
    #[instrument(
        skip_all,
        fields(
            program = %self.program,
            continue_conversation = request.continue_conversation
        )
    )]
    fn invoke(&self, request: &InvokeRequest, cancel: &CancelToken) -> Result<InvokeOutput> {
        ensure_working_dir(&request.working_dir)?;
        info!(workdir = %request.working_dir.display(), "invoking agent");

        let cmd = self.build_command(request);
        let output = match run_command(cmd, None, self.timeout, self.output_limit_bytes, cancel) {
            Ok(output) => output,
            Err(err) => {
                let not_found = err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::NotFound);
                if not_found {
                    return Err(AtomError::AgentNotFound(self.program.clone()).into());
                }
                return Err(err).with_context(|| format!("run {}", self.program));
            }
        };

        if !output.stderr.is_empty() {
            debug!(stderr = %output.stderr_text(), "agent stderr");
        }
        let exit_status = if output.timed_out {
            warn!(timeout_secs = self.timeout.map(|t| t.as_secs()), "agent timed out");
            TIMEOUT_EXIT_STATUS
        } else {
            output.status.code().unwrap_or(SIGNALED_EXIT_STATUS)
        };
        debug!(exit_status, bytes = output.stdout.len(), "agent finished");

        Ok(InvokeOutput {
            raw_output: output.stdout_text(),
            exit_status,
        })
    }
}
