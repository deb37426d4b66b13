use super::Result;
use crate::error::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

type CleanupAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// A deferred release action registered by a test or fixture
struct CleanupEntry {
    label: String,
    action: CleanupAction,
}

/// A cleanup action that returned an error or panicked
#[derive(Debug)]
pub struct CleanupFailure {
    /// Label the action was registered with
    pub label: String,
    /// What the action raised
    pub error: eyre::Report,
}

/// LIFO stack of release actions.
///
/// Every registered action runs exactly once, most recent first, even when an
/// earlier one fails. A stack dropped with pending entries runs them on drop.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<CleanupEntry>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action to run during teardown
    ///
    /// # Arguments
    /// * `label` - Name used in logs and failure details
    /// * `action` - The release action
    pub fn register<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.entries.push(CleanupEntry {
            label: label.into(),
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pops and runs every entry in reverse registration order
    ///
    /// # Returns
    /// * `Vec<CleanupFailure>` - One item per failed or panicked entry, in execution order
    pub fn run_all(&mut self) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();

        while let Some(CleanupEntry { label, action }) = self.entries.pop() {
            debug!("running cleanup: {}", label);
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!("cleanup '{}' failed: {:#}", label, error);
                    failures.push(CleanupFailure { label, error });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("cleanup '{}' panicked: {}", label, message);
                    failures.push(CleanupFailure {
                        label,
                        error: eyre::eyre!("cleanup panicked: {}", message),
                    });
                }
            }
        }

        failures
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        warn!("cleanup stack dropped with {} pending entries", self.entries.len());
        for failure in self.run_all() {
            warn!("cleanup '{}' failed during drop: {:#}", failure.label, failure.error);
        }
    }
}
