//! Auxiliary agent passes around the main iteration loop: planning a
//! decomposition up front and reviewing the result afterwards.

use std::path::Path;

use crate::io::invoker::InvokeRequest;

pub mod decomposer;
pub mod meta;

/// Request for a one-shot auxiliary invocation.
pub(crate) fn aux_request(
    working_dir: &Path,
    prompt: String,
    system_prompt: &str,
    continue_conversation: bool,
    skip_permission_prompts: bool,
) -> InvokeRequest {
    InvokeRequest {
        working_dir: working_dir.to_path_buf(),
        prompt,
        system_prompt: Some(system_prompt.to_string()),
        continue_conversation,
        skip_permission_prompts,
    }
}
