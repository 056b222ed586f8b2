use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, skipping any directory whose file name
/// matches an entry of `exclude_dirs` (at any depth). Regular files are
/// copied byte-for-byte; symlinks are rejected.
pub fn copy_tree_filtered(src: &Path, dst: &Path, exclude_dirs: &[&str]) -> Result<()> {
    if !src.is_dir() {
        bail!("copy source is not a directory: {}", src.display());
    }

    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name();
            !exclude_dirs.iter().any(|ex| name == OsStr::new(ex))
        });

    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let out = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("create dir: {}", out.display()))?;
            continue;
        }

        if entry.file_type().is_symlink() {
            bail!("symlinks are not supported: {}", entry.path().display());
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create parent dir: {}", parent.display()))?;
        }

        std::fs::copy(entry.path(), &out)
            .with_context(|| format!("copy {} -> {}", entry.path().display(), out.display()))?;
    }

    Ok(())
}

/// Remove a directory tree if it exists.
///
/// Git leaves read-only object files in clones; a plain removal fails on
/// those (and on read-only directories) with a permission error. In that
/// case write bits are restored across the tree and the removal retried
/// once.
pub fn remove_tree_robust(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            clear_readonly(path);
            std::fs::remove_dir_all(path)
                .with_context(|| format!("remove {}", path.display()))
        }
        Err(err) => {
            Err(err).with_context(|| format!("remove {}", path.display()))
        }
    }
}

/// Walk upwards from `start` to the nearest ancestor containing `marker`.
pub fn find_project_root(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut dir: Option<&Path> = Some(start);
    while let Some(d) = dir {
        if d.join(marker).exists() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

fn clear_readonly(root: &Path) {
    for entry in WalkDir::new(root).into_iter().flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mut perms = meta.permissions();
        if !perms.readonly() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            perms.set_mode(perms.mode() | 0o200);
        }
        #[cfg(not(unix))]
        {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
        }
        let _ = std::fs::set_permissions(entry.path(), perms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, bytes).expect("write file");
    }

    #[test]
    fn copy_tree_filtered_skips_excluded_dirs_at_any_depth() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");

        write(&src.join("index.js"), b"top");
        write(&src.join("lib/util.js"), b"nested");
        write(&src.join("build/output.node"), b"artifact");
        write(&src.join("lib/dist/bundle.js"), b"artifact");
        write(&src.join("distro/keep.js"), b"not an exact match");

        copy_tree_filtered(&src, &dst, &["build", "dist"]).expect("copy");

        assert_eq!(std::fs::read(dst.join("index.js")).expect("read"), b"top");
        assert_eq!(std::fs::read(dst.join("lib/util.js")).expect("read"), b"nested");
        assert!(!dst.join("build").exists());
        assert!(!dst.join("lib/dist").exists());
        assert!(dst.join("distro/keep.js").is_file());
    }

    #[test]
    fn copy_tree_filtered_without_exclusions_copies_everything() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");

        write(&src.join("build/output.node"), b"artifact");
        write(&src.join("a/b/c.txt"), b"deep");

        copy_tree_filtered(&src, &dst, &[]).expect("copy");

        assert!(dst.join("build/output.node").is_file());
        assert_eq!(std::fs::read(dst.join("a/b/c.txt")).expect("read"), b"deep");
    }

    #[test]
    fn copy_tree_filtered_rejects_missing_source() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = copy_tree_filtered(
            &tmp.path().join("nope"),
            &tmp.path().join("dst"),
            &[],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("not a directory"));
    }

    #[test]
    fn remove_tree_robust_on_missing_path_is_a_no_op() {
        let tmp = tempfile::tempdir().expect("tempdir");
        remove_tree_robust(&tmp.path().join("absent")).expect("no-op");
    }

    #[cfg(unix)]
    #[test]
    fn remove_tree_robust_clears_readonly_dirs() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("clone");
        write(&root.join("objects/pack.idx"), b"data");

        let objects = root.join("objects");
        std::fs::set_permissions(&objects, std::fs::Permissions::from_mode(0o555))
            .expect("chmod");

        remove_tree_robust(&root).expect("remove despite read-only dir");
        assert!(!root.exists());
    }

    #[test]
    fn find_project_root_walks_upwards() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("proj");
        write(&root.join("package.cross.json"), b"{}");
        let deep = root.join("packages/tests/src");
        std::fs::create_dir_all(&deep).expect("create dirs");

        assert_eq!(
            find_project_root(&deep, "package.cross.json"),
            Some(root.clone())
        );
        assert_eq!(find_project_root(tmp.path(), "package.cross.json"), None);
    }
}
