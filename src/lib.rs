pub type Result<T> = color_eyre::eyre::Result<T>;

pub mod assertions;
pub mod callbacks;
pub mod case;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod messaging;
pub mod monitor;
pub mod names;
pub mod plugin_fixture;
pub mod policy;
pub mod random;
pub mod rpc;
pub mod runner;
pub mod singleton;
pub mod suite;
pub mod timeout;

pub use case::{SetupLevel, TestCase};
pub use context::TestContext;
pub use error::{request_exit, HarnessError, TestError, TestOutcome};
pub use runner::{Phase, RunSummary, Runner, TestResult, TestStatus};
