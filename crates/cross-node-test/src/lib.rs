use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;

use devtools_common::{copy_tree_filtered, find_project_root, require_in_path, run_checked};

pub const REPORT_SCHEMA_VERSION: &str = "cross-node-test.report@0.1.0";

/// Node releases the addon is built and tested against, oldest first.
pub const NODE_TEST_VERSIONS: &[&str] = &[
    "18.20.5",
    "19.9.0",
    "20.18.1",
    "21.7.3",
    "22.12.0",
    "23.5.0",
];

/// Packages that must exist under `packages/` and are copied into every
/// sandbox.
pub const REQUIRED_PACKAGES: &[&str] = &["@types", "allnative", "minimum", "tests"];

/// Addon sub-packages that carry a node-gyp build.
pub const NATIVE_PACKAGES: &[&str] = &["allnative", "minimum"];

/// Manifest template at the project root; doubles as the root marker for
/// upward resolution.
pub const MANIFEST_TEMPLATE: &str = "package.cross.json";

/// Sandbox root under the project root, one subdirectory per Node version.
pub const SANDBOX_DIR_NAME: &str = ".cross-testing";

/// Build-output directories never copied into a sandbox.
const COPY_EXCLUDES: &[&str] = &["build", "dist"];

/// Linear progress marker, reported before the work it names starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    InstallNode,
    Copy,
    InstallPackages,
    NativeBuild,
    Tests,
    Finished,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::InstallNode,
        Stage::Copy,
        Stage::InstallPackages,
        Stage::NativeBuild,
        Stage::Tests,
        Stage::Finished,
    ];

    pub fn description(self) -> &'static str {
        match self {
            Stage::InstallNode => "Installing node",
            Stage::Copy => "Copying artifacts",
            Stage::InstallPackages => "Installing packages",
            Stage::NativeBuild => "Building native code",
            Stage::Tests => "Running tests",
            Stage::Finished => "Success",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::InstallNode => "install_node",
            Stage::Copy => "copy",
            Stage::InstallPackages => "install_packages",
            Stage::NativeBuild => "native_build",
            Stage::Tests => "tests",
            Stage::Finished => "finished",
        }
    }
}

/// Project directories consumed and produced by the runner.
#[derive(Debug)]
pub struct Layout {
    pub root: PathBuf,
    pub packages_dir: PathBuf,
    pub native_dir: PathBuf,
    pub sandbox_root: PathBuf,
    pub manifest_template: PathBuf,
}

impl Layout {
    pub fn from_root(root: &Path) -> Result<Self> {
        let layout = Layout {
            root: root.to_path_buf(),
            packages_dir: root.join("packages"),
            native_dir: root.join("native"),
            sandbox_root: root.join(SANDBOX_DIR_NAME),
            manifest_template: root.join(MANIFEST_TEMPLATE),
        };
        if !layout.packages_dir.is_dir() {
            anyhow::bail!("missing packages dir: {}", layout.packages_dir.display());
        }
        if !layout.native_dir.is_dir() {
            anyhow::bail!("missing native dir: {}", layout.native_dir.display());
        }
        if !layout.manifest_template.is_file() {
            anyhow::bail!(
                "missing manifest template: {}",
                layout.manifest_template.display()
            );
        }
        Ok(layout)
    }

    /// Resolve from an explicit `--root`, or walk upwards from the current
    /// directory to the nearest ancestor containing the manifest template.
    pub fn resolve(root_flag: Option<&Path>) -> Result<Self> {
        if let Some(root) = root_flag {
            return Layout::from_root(root);
        }
        let cwd = std::env::current_dir().context("resolve current directory")?;
        let root = find_project_root(&cwd, MANIFEST_TEMPLATE).with_context(|| {
            format!(
                "no {MANIFEST_TEMPLATE} found in {} or any parent (pass --root)",
                cwd.display()
            )
        })?;
        Layout::from_root(&root)
    }

    pub fn sandbox_dir(&self, version: &str) -> PathBuf {
        self.sandbox_root.join(version)
    }
}

/// Resolved executables for every external tool the runner drives. The
/// version-manager state these tools share is host-global; this handle is
/// the only way pipeline steps touch it.
#[derive(Debug)]
pub struct Tools {
    pub node: PathBuf,
    pub nvm: PathBuf,
    pub yarn: PathBuf,
    pub corepack: PathBuf,
}

impl Tools {
    pub fn resolve() -> Result<Self> {
        Ok(Tools {
            node: require_in_path("node")?,
            nvm: require_in_path("nvm")?,
            yarn: require_in_path("yarn")?,
            corepack: require_in_path("corepack")?,
        })
    }

    /// The version string reported by `node --version` (e.g. `v20.18.1`),
    /// trailing newline stripped.
    pub fn current_node_version(&self) -> Result<String> {
        let out = run_checked(&self.node, &["--version"], None)?;
        let stdout =
            String::from_utf8(out.stdout).context("node --version output is not UTF-8")?;
        Ok(trim_trailing_newline(&stdout).to_string())
    }

    pub fn install_node(&self, version: &str) -> Result<()> {
        self.nvm(&["install", version])
    }

    pub fn use_node(&self, version: &str) -> Result<()> {
        self.nvm(&["use", version])
    }

    pub fn corepack_enable(&self, cwd: &Path) -> Result<()> {
        run_checked(&self.corepack, &["enable"], Some(cwd)).map(|_| ())
    }

    pub fn yarn(&self, args: &[&str], cwd: &Path) -> Result<()> {
        run_checked(&self.yarn, args, Some(cwd)).map(|_| ())
    }

    /// node-gyp configure + build with a parallelism hint matching the
    /// host's logical core count.
    pub fn build_native(&self, package_dir: &Path, jobs: usize) -> Result<()> {
        self.yarn(&["node-gyp", "configure"], package_dir)?;
        let jobs = jobs.to_string();
        self.yarn(&["node-gyp", "build", "-j", &jobs], package_dir)
    }

    fn nvm(&self, args: &[&str]) -> Result<()> {
        run_checked(&self.nvm, args, None).map(|_| ())
    }
}

/// Restores the Node version captured at startup when dropped, on success
/// and failure paths alike.
pub struct NodeVersionGuard<'a> {
    tools: &'a Tools,
    original: String,
}

impl<'a> NodeVersionGuard<'a> {
    pub fn new(tools: &'a Tools, original: String) -> Self {
        NodeVersionGuard { tools, original }
    }
}

impl Drop for NodeVersionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.tools.use_node(&self.original) {
            eprintln!("failed to restore node {}: {err:#}", self.original);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub schema_version: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_version: Option<String>,
    pub versions: Vec<VersionReport>,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: false,
            original_version: None,
            versions: Vec::new(),
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        RunReport::new()
    }
}

#[derive(Debug, Serialize)]
pub struct VersionReport {
    pub version: String,
    /// Stage names in the order they were reported.
    pub stages: Vec<&'static str>,
}

/// Full build-and-test pipeline for one Node version. Stages are recorded
/// into `stages` as they are announced, so a failed run keeps the partial
/// trail.
pub fn run_tests_for_node(
    tools: &Tools,
    layout: &Layout,
    version: &str,
    stages: &mut Vec<&'static str>,
) -> Result<()> {
    let sandbox = layout.sandbox_dir(version);

    enter_stage(version, Stage::InstallNode, stages);
    tools.install_node(version)?;
    tools.use_node(version)?;

    enter_stage(version, Stage::Copy, stages);
    copy_artifacts(layout, version)?;

    enter_stage(version, Stage::InstallPackages, stages);
    tools.corepack_enable(&sandbox)?;
    tools.yarn(&["install"], &sandbox)?;

    enter_stage(version, Stage::NativeBuild, stages);
    let jobs = build_parallelism();
    for package in NATIVE_PACKAGES {
        tools.build_native(&sandbox.join("packages").join(package), jobs)?;
    }

    enter_stage(version, Stage::Tests, stages);
    tools.yarn(&["test"], &sandbox)?;

    enter_stage(version, Stage::Finished, stages);
    Ok(())
}

/// Populate the per-version sandbox: required packages (minus build output),
/// the native sources, the shared tsconfig, a manifest synthesized from the
/// template, and an empty yarn.lock. The empty lock file marks the sandbox
/// as a standalone yarn project rather than a member of the enclosing
/// workspace.
pub fn copy_artifacts(layout: &Layout, version: &str) -> Result<()> {
    let dest = layout.sandbox_dir(version);
    let dest_packages = dest.join("packages");

    for package in REQUIRED_PACKAGES {
        copy_tree_filtered(
            &layout.packages_dir.join(package),
            &dest_packages.join(package),
            COPY_EXCLUDES,
        )?;
    }

    copy_tree_filtered(&layout.native_dir, &dest.join("native"), &[])?;

    let tsconfig = layout.packages_dir.join("tsconfig.base.json");
    std::fs::copy(&tsconfig, dest_packages.join("tsconfig.base.json"))
        .with_context(|| format!("copy {}", tsconfig.display()))?;

    let manifest = dest.join("package.json");
    std::fs::copy(&layout.manifest_template, &manifest)
        .with_context(|| format!("synthesize {}", manifest.display()))?;

    std::fs::write(dest.join("yarn.lock"), b"")
        .with_context(|| format!("write {}", dest.join("yarn.lock").display()))?;

    Ok(())
}

pub fn build_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

pub fn trim_trailing_newline(s: &str) -> &str {
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.strip_suffix('\r').unwrap_or(s)
}

fn enter_stage(version: &str, stage: Stage, stages: &mut Vec<&'static str>) {
    println!("{}: {}", style(version).green(), stage.description());
    stages.push(stage.name());
}
