//! Shared plumbing for the repo's automation binaries.
//!
//! Everything here is glue over external tools and the filesystem: checked
//! process invocation with captured output, filtered tree copies, and
//! removal that tolerates read-only files left behind by git.

pub mod fsops;
pub mod proc;

pub use fsops::{copy_tree_filtered, find_project_root, remove_tree_robust};
pub use proc::{find_in_path, require_in_path, run_checked};
