//! Durable task marker read by the agent from its working directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// File name of the task marker inside the working directory.
pub const TASK_FILE_NAME: &str = "USER_PROMPT.md";

pub fn task_file_path(working_dir: &Path) -> PathBuf {
    working_dir.join(TASK_FILE_NAME)
}

/// Write `task` verbatim to the marker file, replacing any previous content.
pub fn write_task_file(working_dir: &Path, task: &str) -> Result<PathBuf> {
    let path = task_file_path(working_dir);
    fs::write(&path, task).with_context(|| format!("write task file {}", path.display()))?;
    debug!(path = %path.display(), "task file written");
    Ok(path)
}

/// Delete the marker file. A missing file is not an error.
pub fn remove_task_file(working_dir: &Path) -> Result<()> {
    let path = task_file_path(working_dir);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "task file removed");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove task file {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_exact_task_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = "line one\nline two without newline";
        let path = write_task_file(temp.path(), task).expect("write");
        assert_eq!(fs::read_to_string(path).expect("read"), task);
    }

    #[test]
    fn removing_twice_is_fine() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_task_file(temp.path(), "x").expect("write");
        remove_task_file(temp.path()).expect("remove");
        remove_task_file(temp.path()).expect("remove again");
        assert!(!task_file_path(temp.path()).exists());
    }
}
