use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the harness itself, as opposed to failures raised by
/// the code under test.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("process exit requested during test (exit code {code})")]
    ExitDuringTest { code: i32 },

    #[error("Execution of this test timed out after {0:?}")]
    Timeout(Duration),

    #[error("The plugin for this test was not deallocated: {resource}")]
    DeallocationLeak { resource: String },

    #[error("singleton slot '{slot}' is already occupied")]
    SlotOccupied { slot: &'static str },

    #[error("singleton slot '{slot}' was still occupied at the test boundary")]
    SlotNotEmpty { slot: &'static str },

    #[error("unsupported post-mortem debugger '{0}'")]
    UnknownDebugger(String),

    #[error("no plugin named '{0}' is registered")]
    UnknownPlugin(String),
}

/// Request to terminate the current process, raised from inside a test.
///
/// Code under test raises it either by returning [`TestError::exit`] or by
/// calling [`request_exit`] from anywhere below the test body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub code: i32,
}

/// Unwinds out of the current test with an exit request.
pub fn request_exit(code: i32) -> ! {
    std::panic::panic_any(ExitRequest { code })
}

/// A condition raised by a test body or by fixture setup.
#[derive(Debug)]
pub enum TestError {
    /// An ordinary failure.
    Failure(eyre::Report),
    /// An unconditional process-exit request.
    Exit(ExitRequest),
}

pub type TestOutcome = std::result::Result<(), TestError>;

impl TestError {
    pub fn exit(code: i32) -> Self {
        TestError::Exit(ExitRequest { code })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TestError::Exit(request) => Some(request.code),
            TestError::Failure(_) => None,
        }
    }

    /// Converts a panic payload caught around a test body.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<ExitRequest>() {
            Ok(request) => TestError::Exit(*request),
            Err(payload) => TestError::Failure(eyre::eyre!(
                "test panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl<E> From<E> for TestError
where
    E: Into<eyre::Report>,
{
    fn from(error: E) -> Self {
        TestError::Failure(error.into())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Failure(report) => write!(f, "{report:#}"),
            TestError::Exit(request) => write!(f, "exit requested with code {}", request.code),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(request) = payload.downcast_ref::<ExitRequest>() {
        format!("exit requested with code {}", request.code)
    } else {
        "non-string panic payload".to_string()
    }
}
