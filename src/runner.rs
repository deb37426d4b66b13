//! Runs test cases one at a time and turns their outcome into results.

use super::Result;
use crate::callbacks;
use crate::case::{TestBody, TestCase};
use crate::cleanup::CleanupFailure;
use crate::context::{Detail, TestContext};
use crate::environment::HarnessConfig;
use crate::error::{HarnessError, TestError, TestOutcome};
use crate::manager::{self, CoreManager};
use crate::timeout::with_timeout;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use once_cell::sync::Lazy;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Held for the whole of each test so process-wide state has one writer
static RUN_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Where in a test's life a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SetUp,
    Body,
    Cleanup,
}

#[derive(Debug)]
pub struct Failure {
    pub phase: Phase,
    pub error: eyre::Report,
}

impl Failure {
    /// The harness error behind this failure, if it is one
    pub fn harness_error(&self) -> Option<&HarnessError> {
        self.error.downcast_ref::<HarnessError>()
    }
}

#[derive(Debug)]
pub enum TestStatus {
    Passed,
    Failed(Failure),
    /// A spawned worker asked to exit; the code is handed to its caller
    Exited { code: i32 },
}

#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub details: Vec<Detail>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TestStatus::Passed)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.status {
            TestStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn detail(&self, name: &str) -> Option<&Detail> {
        self.details.iter().find(|detail| detail.name == name)
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            TestStatus::Passed => write!(f, "{} ... ok", self.name),
            TestStatus::Failed(failure) => {
                write!(f, "{} ... FAIL ({:?}): {:#}", self.name, failure.phase, failure.error)
            }
            TestStatus::Exited { code } => write!(f, "{} ... exited({})", self.name, code),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<TestResult>,
    /// Exit code a spawned worker asked for; the run stopped at that test
    pub exit: Option<i32>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Tests that failed. A propagated exit is not a failure.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.failure().is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Sequential test runner
pub struct Runner {
    config: HarnessConfig,
}

impl Runner {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Runner configured from the `OS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(HarnessConfig::from_env()?))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs one test. Waits for any other test in the process to finish first.
    pub async fn run(&self, case: TestCase) -> TestResult {
        let _guard = RUN_LOCK.lock().await;
        let span = info_span!("test", name = %case.name());
        self.run_exclusive(case).instrument(span).await
    }

    /// Runs `cases` in order.
    ///
    /// Stops after a test whose exit request propagated: the worker that
    /// raised it must leave with that code instead of running more tests.
    pub async fn run_all(&self, cases: impl IntoIterator<Item = TestCase>) -> RunSummary {
        let mut summary = RunSummary::default();
        for case in cases {
            let result = self.run(case).await;
            info!("{}", result);
            let exit = match result.status {
                TestStatus::Exited { code } => Some(code),
                _ => None,
            };
            summary.results.push(result);

            if let Some(code) = exit {
                warn!("exit({}) propagated, skipping remaining tests", code);
                summary.exit = Some(code);
                break;
            }
        }
        info!("{} passed, {} failed", summary.passed(), summary.failed());
        summary
    }

    async fn run_exclusive(&self, case: TestCase) -> TestResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let name = case.name().to_string();
        let mut ctx = TestContext::new(&name, self.config.clone());

        let status = match enforce_boundary() {
            Err(e) => {
                error!("state left behind before {}: {}", name, e);
                TestStatus::Failed(Failure {
                    phase: Phase::SetUp,
                    error: e.into(),
                })
            }
            Ok(()) => match case.set_up(&mut ctx) {
                (Err(e), _) => self.settle(&mut ctx, Phase::SetUp, TestError::Failure(e)),
                (Ok(()), body) => self.run_body(&mut ctx, body).await,
            },
        };

        let status = self.tear_down(&mut ctx, status);

        TestResult {
            name,
            status,
            details: ctx.take_details(),
            started_at,
            duration: clock.elapsed(),
        }
    }

    async fn run_body(&self, ctx: &mut TestContext, body: TestBody) -> TestStatus {
        let outcome = {
            let guarded = AssertUnwindSafe(body(&mut *ctx)).catch_unwind();
            match self.config.test_timeout {
                Some(limit) => match with_timeout(limit, guarded).await {
                    Ok(caught) => flatten(caught),
                    Err(timeout) => Err(TestError::Failure(timeout.into())),
                },
                None => flatten(guarded.await),
            }
        };

        match outcome {
            Ok(()) => TestStatus::Passed,
            Err(error) => self.settle(ctx, Phase::Body, error),
        }
    }

    /// Runs the handler chain for a raised condition and decides the status
    fn settle(&self, ctx: &mut TestContext, phase: Phase, error: TestError) -> TestStatus {
        let report = ctx.dispatch_exception(&error);
        match error {
            TestError::Exit(request) if report.propagate => TestStatus::Exited {
                code: request.code,
            },
            TestError::Exit(request) => {
                debug!("exit({}) turned into a failure", request.code);
                TestStatus::Failed(Failure {
                    phase,
                    error: HarnessError::ExitDuringTest { code: request.code }.into(),
                })
            }
            TestError::Failure(error) => TestStatus::Failed(Failure { phase, error }),
        }
    }

    fn tear_down(&self, ctx: &mut TestContext, status: TestStatus) -> TestStatus {
        let mut first_error = None;
        for CleanupFailure { label, error } in ctx.run_cleanups() {
            warn!("cleanup '{}' failed: {:#}", label, error);
            ctx.add_detail(format!("cleanup failure: {label}"), format!("{error:?}"));
            first_error.get_or_insert(error);
        }

        if let Err(e) = enforce_boundary() {
            error!("{}", e);
            ctx.add_detail("state left behind", e.to_string());
            first_error.get_or_insert(e.into());
        }

        match (status, first_error) {
            (TestStatus::Passed, Some(error)) => TestStatus::Failed(Failure {
                phase: Phase::Cleanup,
                error,
            }),
            (status, _) => status,
        }
    }
}

fn flatten(caught: std::thread::Result<TestOutcome>) -> TestOutcome {
    caught.unwrap_or_else(|payload| Err(TestError::from_panic(payload)))
}

/// Checks that no test left the singleton or the callbacks accessor occupied.
///
/// Anything found is cleared so the next test starts from a clean state.
fn enforce_boundary() -> std::result::Result<(), HarnessError> {
    let mut result = CoreManager::slot().ensure_empty();
    if result.is_err() {
        manager::reset_agent_notifiers();
        CoreManager::clear_instance();
    }

    if callbacks::clear_substitute().is_some() && result.is_ok() {
        result = Err(HarnessError::SlotNotEmpty {
            slot: "callbacks registry",
        });
    }
    result
}
