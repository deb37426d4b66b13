use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use testbed::environment::HarnessConfig;
use testbed::{RunSummary, Runner, TestCase, TestResult};
use tokio::process::Command;
use tokio::time::timeout;

/// Wraps a runner configured for one scenario, plus access to the binary
pub struct HarnessFixture {
    runner: Runner,
}

impl HarnessFixture {
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            runner: Runner::new(config),
        }
    }

    /// Runner that verifies plugin deallocation at teardown
    pub fn checking_deallocation() -> Self {
        Self::with_config(HarnessConfig {
            check_plugin_deallocation: true,
            ..HarnessConfig::default()
        })
    }

    /// Runner that bounds every test body
    pub fn with_timeout(limit: Duration) -> Self {
        Self::with_config(HarnessConfig {
            test_timeout: Some(limit),
            ..HarnessConfig::default()
        })
    }

    pub async fn run(&self, case: TestCase) -> TestResult {
        self.runner.run(case).await
    }

    pub async fn run_all(&self, cases: Vec<TestCase>) -> RunSummary {
        self.runner.run_all(cases).await
    }

    /// Path of the `testbed` binary built for this test run
    pub fn binary() -> PathBuf {
        PathBuf::from(env!("CARGO_BIN_EXE_testbed"))
    }

    /// Runs the binary with `args`, giving up after `limit`
    pub async fn run_binary(args: &[&str], limit: Duration) -> Result<Output> {
        let mut cmd = Command::new(Self::binary());
        cmd.args(args)
            .env_remove("OS_POST_MORTEM_DEBUGGER")
            .env_remove("RUST_LOG")
            .kill_on_drop(true);

        timeout(limit, cmd.output())
            .await
            .context("testbed binary did not finish in time")?
            .context("Failed to run testbed binary")
    }
}

impl Default for HarnessFixture {
    fn default() -> Self {
        Self::new()
    }
}
