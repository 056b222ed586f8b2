use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};

/// Locate `prog` in the directories of the `PATH` environment variable.
pub fn find_in_path(prog: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(prog);
        if cand.is_file() && is_executable(&cand) {
            return Some(cand);
        }
    }
    None
}

/// Like [`find_in_path`], but absence of the tool is a fatal error.
pub fn require_in_path(prog: &str) -> Result<PathBuf> {
    find_in_path(prog).with_context(|| format!("required tool not found on PATH: {prog}"))
}

/// Run a command to completion with captured stdout/stderr.
///
/// A non-zero exit status is an error; the error message carries the exit
/// status and both captured streams so callers can surface them verbatim.
pub fn run_checked<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let out = cmd
        .output()
        .with_context(|| format!("spawn {}", program.display()))?;

    if out.status.success() {
        Ok(out)
    } else {
        anyhow::bail!(
            "{} failed ({})\nstdout:\n{}\nstderr:\n{}",
            program.display(),
            out.status,
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        )
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Ok(meta) = std::fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
