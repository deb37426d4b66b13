use super::Result;
use crate::context::{Detail, ExecutionInfo};
use crate::error::{panic_message, HarnessError, TestError};
use eyre::eyre;
use nix::unistd::{getpid, Pid};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::Command;
use tracing::{debug, info, warn};

/// What a handler decided about the raised condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to add
    Continue,
    /// Report the test as failed even if the condition would not fail it
    ForceFailure,
    /// Let the condition escape the test unchanged; later handlers do not run
    Propagate,
}

pub type ExceptionHandler =
    Box<dyn Fn(&TestError, &ExecutionInfo) -> Result<Verdict> + Send + Sync>;

/// Outcome of running the handler chain once
#[derive(Debug, Default)]
pub struct HandlerReport {
    pub force_failure: bool,
    pub propagate: bool,
    /// Failures of the handlers themselves
    pub details: Vec<Detail>,
}

/// Handlers run in insertion order whenever a test raises
#[derive(Default)]
pub struct ExceptionHandlerChain {
    handlers: Vec<(String, ExceptionHandler)>,
}

impl ExceptionHandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, name: impl Into<String>, handler: ExceptionHandler) {
        self.handlers.push((name.into(), handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every handler against `error`.
    ///
    /// A handler that errors or panics is recorded as a detail and the chain
    /// moves on; it never replaces the original condition.
    pub fn dispatch(&self, error: &TestError, info: &ExecutionInfo) -> HandlerReport {
        let mut report = HandlerReport::default();

        for (name, handler) in &self.handlers {
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(error, info))) {
                Ok(Ok(Verdict::Continue)) => continue,
                Ok(Ok(Verdict::ForceFailure)) => {
                    report.force_failure = true;
                    continue;
                }
                Ok(Ok(Verdict::Propagate)) => {
                    report.propagate = true;
                    break;
                }
                Ok(Err(e)) => format!("{e:?}"),
                Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
            };

            warn!("exception handler '{}' failed", name);
            report
                .details
                .push(Detail::new(format!("failure in exception handler {name}"), failure));
        }

        report
    }
}

/// Turns an exit request into a test failure in the process that started
/// the test, and lets it through in a spawned child so the child exits.
pub fn check_for_exit(error: &TestError, info: &ExecutionInfo) -> Result<Verdict> {
    let TestError::Exit(request) = error else {
        return Ok(Verdict::Continue);
    };

    if info.is_spawned() {
        info!("exit({}) requested from a spawned worker, propagating", request.code);
        Ok(Verdict::Propagate)
    } else {
        // exit(0) still fails the test
        Ok(Verdict::ForceFailure)
    }
}

/// Attaches an interactive debugger to the test process whenever a test
/// raises, exit requests included.
///
/// The session is interactive: the test thread waits until the debugger
/// detaches, and the runner does not continue with cleanups before that.
#[derive(Debug, Clone)]
pub struct PostMortemDebugger {
    program: &'static str,
}

const SUPPORTED_DEBUGGERS: [&str; 4] = ["gdb", "lldb", "rust-gdb", "rust-lldb"];

impl PostMortemDebugger {
    pub fn from_name(name: &str) -> std::result::Result<Self, HarnessError> {
        SUPPORTED_DEBUGGERS
            .iter()
            .find(|supported| **supported == name)
            .map(|program| Self { program })
            .ok_or_else(|| HarnessError::UnknownDebugger(name.to_string()))
    }

    pub fn program(&self) -> &'static str {
        self.program
    }

    /// Runs the debugger against `pid` and waits for the session to end
    pub fn attach(&self, pid: Pid) -> Result<()> {
        info!("attaching {} to pid {}", self.program, pid);
        let status = Command::new(self.program)
            .arg("-p")
            .arg(pid.to_string())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(eyre!("{} exited with {}", self.program, status))
        }
    }

    pub fn into_handler(self) -> ExceptionHandler {
        Box::new(move |error, info| {
            debug!("{} raised {}, attaching {}", info.test_name, error, self.program);
            self.attach(getpid())?;
            Ok(Verdict::Continue)
        })
    }
}
