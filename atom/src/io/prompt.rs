//! Layered system-prompt composition.
//!
//! A fragment is a markdown file named `<NAME>.md`. Each fragment name is
//! resolved independently against an ordered list of directories (project
//! local, global, bundled, environment override); the first existing file
//! wins. Which fragments make up a prompt depends on the tool name.
//!
//! The base fragment also ships inside the binary and is used when no
//! directory provides one, so a fresh install composes a working prompt.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::AtomError;

/// Name of the base fragment.
pub const BASE_FRAGMENT: &str = "ATOM";
/// Tool names with this prefix layer their fragment on top of the base.
pub const RESERVED_PREFIX: &str = "atom_";
/// Environment override for the prompt search directory.
pub const PROMPTS_PATH_ENV: &str = "ATOM_PROMPTS_PATH";
/// Environment override for the tool search root (`<root>/prompts` is searched).
pub const TOOLS_PATH_ENV: &str = "ATOM_TOOLS_PATH";
/// Base fragment compiled into the binary.
pub const EMBEDDED_BASE: &str = include_str!("prompts/ATOM.md");

/// Outcome of resolving one fragment name. Resolution never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound { searched: Vec<PathBuf> },
}

/// Resolve `fragment` against `dirs` in order.
pub fn resolve_fragment(dirs: &[PathBuf], fragment: &str) -> Resolution {
    let candidates: Vec<PathBuf> = dirs.iter().map(|d| d.join(format!("{fragment}.md"))).collect();
    match candidates.iter().find(|p| p.is_file()) {
        Some(found) => Resolution::Found(found.clone()),
        None => Resolution::NotFound {
            searched: candidates,
        },
    }
}

/// Fragment names that make up the prompt for `tool_name`, in concatenation order.
pub fn fragments_for(tool_name: Option<&str>) -> Vec<String> {
    match tool_name.map(str::trim).filter(|name| !name.is_empty()) {
        None => vec![BASE_FRAGMENT.to_string()],
        Some(name) => match name.strip_prefix(RESERVED_PREFIX) {
            Some(rest) if !rest.is_empty() => {
                vec![BASE_FRAGMENT.to_string(), rest.to_uppercase()]
            }
            Some(_) => vec![BASE_FRAGMENT.to_string()],
            None => vec![name.to_uppercase()],
        },
    }
}

/// Directories searched for fragments, highest precedence first.
#[derive(Debug, Clone, Default)]
pub struct PromptSearchPaths {
    pub local: Option<PathBuf>,
    pub global: Option<PathBuf>,
    pub bundled: Option<PathBuf>,
    pub env_override: Vec<PathBuf>,
}

impl PromptSearchPaths {
    /// Standard layout: `<project>/.atom/prompts`, `$HOME/.atom/prompts`, the
    /// bundled directory, then `ATOM_PROMPTS_PATH` and `ATOM_TOOLS_PATH/prompts`
    /// read from the environment now.
    pub fn standard(project_dir: &Path, bundled: Option<PathBuf>) -> Self {
        let global =
            env::var_os("HOME").map(|home| PathBuf::from(home).join(".atom").join("prompts"));
        let mut env_override = Vec::new();
        if let Some(path) = env::var_os(PROMPTS_PATH_ENV).filter(|p| !p.is_empty()) {
            env_override.push(PathBuf::from(path));
        }
        if let Some(path) = env::var_os(TOOLS_PATH_ENV).filter(|p| !p.is_empty()) {
            env_override.push(PathBuf::from(path).join("prompts"));
        }
        Self {
            local: Some(project_dir.join(".atom").join("prompts")),
            global,
            bundled,
            env_override,
        }
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.local
            .iter()
            .chain(self.global.iter())
            .chain(self.bundled.iter())
            .chain(self.env_override.iter())
            .cloned()
            .collect()
    }
}

/// Builds the system prompt for a run.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    dirs: Vec<PathBuf>,
    embedded_base: bool,
}

impl PromptComposer {
    /// Composer over the standard layers, falling back to [`EMBEDDED_BASE`].
    pub fn new(paths: &PromptSearchPaths) -> Self {
        Self {
            dirs: paths.dirs(),
            embedded_base: true,
        }
    }

    /// Composer over exactly `dirs`, with no embedded fallback.
    pub fn from_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            embedded_base: false,
        }
    }

    /// Compose the system prompt for `tool_name`.
    ///
    /// Fragments are joined base-then-specific with a blank line between them.
    /// A single fragment is returned exactly as stored.
    pub fn compose(&self, tool_name: Option<&str>) -> Result<String> {
        let names = fragments_for(tool_name);
        let mut parts = Vec::with_capacity(names.len());
        for name in &names {
            let path = match resolve_fragment(&self.dirs, name) {
                Resolution::Found(path) => path,
                Resolution::NotFound { .. } if self.embedded_base && name == BASE_FRAGMENT => {
                    debug!(fragment = %name, "using embedded prompt fragment");
                    parts.push(EMBEDDED_BASE.to_string());
                    continue;
                }
                Resolution::NotFound { searched } => {
                    return Err(AtomError::MissingPromptFragment {
                        fragment: name.clone(),
                        searched,
                    }
                    .into());
                }
            };
            debug!(fragment = %name, path = %path.display(), "resolved prompt fragment");
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read prompt fragment {}", path.display()))?;
            parts.push(contents);
        }

        let last = parts.len().saturating_sub(1);
        let mut composed = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i < last {
                composed.push_str(part.trim_end());
                composed.push_str("\n\n");
            } else {
                composed.push_str(part);
            }
        }
        Ok(composed)
    }
}
