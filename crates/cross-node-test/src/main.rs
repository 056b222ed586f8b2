use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use cross_node_test::{
    run_tests_for_node, Layout, NodeVersionGuard, RunReport, Tools, VersionReport,
    NODE_TEST_VERSIONS,
};
use devtools_common::remove_tree_robust;

#[derive(Parser, Debug)]
#[command(name = "cross-node-test")]
#[command(about = "Build and test the addon against every supported Node release.", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root (default: nearest ancestor containing package.cross.json).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Emit a machine-readable run report on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut report = RunReport::new();
    let result = run(&cli, &mut report);
    report.ok = result.is_ok();

    if cli.json {
        match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("failed to serialize report: {err}"),
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            // Observable status of the original runner's exit(-1).
            ExitCode::from(255)
        }
    }
}

fn run(cli: &Cli, report: &mut RunReport) -> Result<()> {
    let layout = Layout::resolve(cli.root.as_deref())?;
    let tools = Tools::resolve()?;

    let original = tools.current_node_version()?;
    report.original_version = Some(original.clone());
    let _guard = NodeVersionGuard::new(&tools, original);

    for version in NODE_TEST_VERSIONS {
        let mut per_version = VersionReport {
            version: version.to_string(),
            stages: Vec::new(),
        };
        let result = run_tests_for_node(&tools, &layout, version, &mut per_version.stages);
        report.versions.push(per_version);
        result?;
    }

    println!("{}", style("Success").green());
    remove_tree_robust(&layout.sandbox_root)?;
    Ok(())
}
