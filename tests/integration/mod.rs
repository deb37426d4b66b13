//! Integration tests for the isolation harness
//!
//! Scenarios run real test cases through the runner and inspect the results.

pub mod scenarios;

pub use infrastructure::HarnessFixture;
