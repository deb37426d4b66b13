use clap::Parser;
use eyre::eyre;
use std::time::Duration;

use testbed::environment::{Environment, HarnessConfig};
use testbed::handlers::PostMortemDebugger;

type Result<T> = color_eyre::eyre::Result<T>;

/// Runs the bundled isolation self-checks
#[derive(Parser, Debug)]
#[command(name = "testbed")]
#[command(about = "Runs the bundled per-test isolation self-checks")]
#[command(version)]
pub struct Cli {
    /// Verify the core plugin is released after each check
    #[arg(long)]
    pub check_plugin_deallocation: bool,

    /// Debugger attached on failure (gdb, lldb, rust-gdb, rust-lldb)
    #[arg(long)]
    pub post_mortem_debugger: Option<String>,

    /// Per-check timeout in seconds, 0 disables
    #[arg(long)]
    pub test_timeout_secs: Option<u64>,

    /// Only run checks whose name contains this string
    #[arg(long)]
    pub filter: Option<String>,

    /// Print the check names and exit
    #[arg(long)]
    pub list: bool,
}

/// Configuration for a self-check run
#[derive(Debug, Clone)]
pub struct Config {
    pub harness: HarnessConfig,
    pub filter: Option<String>,
    pub list: bool,
}

impl Config {
    /// Builds the run configuration; flags take precedence over the environment
    pub fn from_cli(cli: Cli, env: &Environment) -> Result<Self> {
        let mut harness = HarnessConfig::from_environment(env)?;

        if cli.check_plugin_deallocation {
            harness.check_plugin_deallocation = true;
        }
        if let Some(debugger) = cli.post_mortem_debugger {
            harness.post_mortem_debugger = Some(debugger);
        }
        if let Some(secs) = cli.test_timeout_secs {
            harness.test_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(debugger) = &harness.post_mortem_debugger {
            PostMortemDebugger::from_name(debugger).map_err(|e| eyre!("Invalid debugger: {}", e))?;
        }

        Ok(Config {
            harness,
            filter: cli.filter,
            list: cli.list,
        })
    }

    pub fn selects(&self, name: &str) -> bool {
        self.filter.as_deref().map_or(true, |filter| name.contains(filter))
    }
}
