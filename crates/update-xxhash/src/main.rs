use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use devtools_common::{find_project_root, remove_tree_robust, require_in_path, run_checked};

const REPORT_SCHEMA_VERSION: &str = "update-xxhash.report@0.1.0";

const UPSTREAM_URL: &str = "https://github.com/Cyan4973/xxHash/";
const CLONE_DIR_NAME: &str = "xxHash";
const HEADER_NAME: &str = "xxhash.h";
const COMMIT_FILE_NAME: &str = "xxhash-commit.txt";

/// Root marker shared with the cross-version runner.
const ROOT_MARKER: &str = "package.cross.json";

#[derive(Parser, Debug)]
#[command(name = "update-xxhash")]
#[command(about = "Refresh the vendored xxhash.h from upstream and record its commit.", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root (default: nearest ancestor containing package.cross.json).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Upstream repository to clone.
    #[arg(long, value_name = "URL", default_value = UPSTREAM_URL)]
    upstream: String,

    /// Emit a machine-readable report on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct UpdateReport {
    schema_version: &'static str,
    ok: bool,
    commit: String,
    header: String,
}

/// Temp clone directory, removed on drop so a failed clone does not leave
/// a half-created tree behind.
struct TempClone {
    dir: PathBuf,
}

impl TempClone {
    fn create(dir: PathBuf) -> Result<Self> {
        remove_tree_robust(&dir)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create temp dir: {}", dir.display()))?;
        Ok(TempClone { dir })
    }

    fn repo_dir(&self) -> PathBuf {
        self.dir.join(CLONE_DIR_NAME)
    }
}

impl Drop for TempClone {
    fn drop(&mut self) {
        if let Err(err) = remove_tree_robust(&self.dir) {
            eprintln!("failed to remove {}: {err:#}", self.dir.display());
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match try_main(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn try_main(cli: &Cli) -> Result<()> {
    let root = resolve_root(cli.root.as_deref())?;
    let native_dir = root.join("native");
    if !native_dir.is_dir() {
        anyhow::bail!("missing native dir: {}", native_dir.display());
    }
    let git = require_in_path("git")?;

    let temp = TempClone::create(root.join("scripts").join(".temp"))?;
    let repo = temp.repo_dir();

    let clone_args: Vec<&OsStr> = vec![
        "clone".as_ref(),
        "--depth".as_ref(),
        "1".as_ref(),
        cli.upstream.as_ref(),
        repo.as_os_str(),
    ];
    run_checked(&git, &clone_args, None)?;

    let header_dst = native_dir.join(HEADER_NAME);
    std::fs::copy(repo.join(HEADER_NAME), &header_dst)
        .with_context(|| format!("vendor {HEADER_NAME} into {}", native_dir.display()))?;

    let out = run_checked(&git, &["rev-parse", "HEAD"], Some(&repo))?;
    let hash = trim_commit_hash(&out.stdout);
    let commit_file = native_dir.join(COMMIT_FILE_NAME);
    std::fs::write(&commit_file, hash)
        .with_context(|| format!("write {}", commit_file.display()))?;

    let commit = String::from_utf8_lossy(hash).to_string();
    if cli.json {
        let report = UpdateReport {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: true,
            commit,
            header: header_dst.display().to_string(),
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("vendored {HEADER_NAME} at {commit}");
    }

    Ok(())
}

fn resolve_root(root_flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = root_flag {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    find_project_root(&cwd, ROOT_MARKER).with_context(|| {
        format!(
            "no {ROOT_MARKER} found in {} or any parent (pass --root)",
            cwd.display()
        )
    })
}

/// Strip exactly one trailing newline (`\n` or `\r\n`) from the rev-parse
/// output; the hash file must hold the raw hash bytes only.
fn trim_commit_hash(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_commit_hash_strips_one_newline() {
        assert_eq!(trim_commit_hash(b"abc123\n"), b"abc123");
        assert_eq!(trim_commit_hash(b"abc123\r\n"), b"abc123");
        assert_eq!(trim_commit_hash(b"abc123"), b"abc123");
        assert_eq!(trim_commit_hash(b"abc123\n\n"), b"abc123\n");
    }

    #[test]
    fn temp_clone_removes_its_dir_on_drop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("scratch/.temp");
        {
            let clone = TempClone::create(dir.clone()).expect("create temp clone");
            assert!(clone.dir.is_dir());
            std::fs::write(clone.repo_dir().with_file_name("leftover"), b"x")
                .expect("write leftover");
        }
        assert!(!dir.exists());
    }

    #[test]
    fn temp_clone_replaces_a_preexisting_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join(".temp");
        std::fs::create_dir_all(dir.join("stale")).expect("create stale tree");

        let clone = TempClone::create(dir.clone()).expect("recreate");
        assert!(!dir.join("stale").exists());
        drop(clone);
    }
}
