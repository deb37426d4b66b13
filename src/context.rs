use super::Result;
use crate::cleanup::{CleanupFailure, CleanupStack};
use crate::config::{ConfigOverlay, ConfigService};
use crate::environment::HarnessConfig;
use crate::error::TestError;
use crate::handlers::{ExceptionHandler, ExceptionHandlerChain, HandlerReport};
use crate::manager::{ManagerOptions, PluginCatalog};
use crate::messaging::{LogNotifier, Notifier};
use crate::monitor::MonitorEntryPoint;
use nix::unistd::{getpid, Pid};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Whether code runs in the process that started the test or in a worker it spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Root,
    Spawned,
}

/// Identity of the running test, fixed when the context is created
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub test_name: String,
    pub origin: Pid,
    pub kind: ExecutionKind,
}

impl ExecutionInfo {
    pub fn new(test_name: impl Into<String>, origin: Pid) -> Self {
        Self {
            test_name: test_name.into(),
            origin,
            kind: ExecutionKind::Root,
        }
    }

    /// True for an explicitly spawned context, or when the current pid is
    /// no longer the one the test started in (forked child)
    pub fn is_spawned(&self) -> bool {
        self.kind == ExecutionKind::Spawned || getpid() != self.origin
    }
}

/// Named diagnostic text attached to a test result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detail {
    pub name: String,
    pub content: String,
}

impl Detail {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Collaborators handed to the code under test.
///
/// Fixtures replace or reconfigure these instead of patching globals.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ConfigOverlay>,
    pub monitors: Arc<MonitorEntryPoint>,
    pub notifier: Arc<dyn Notifier>,
    pub plugins: Arc<PluginCatalog>,
    pub manager: ManagerOptions,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            config: Arc::new(ConfigOverlay::new()),
            monitors: Arc::new(MonitorEntryPoint::default()),
            notifier: Arc::new(LogNotifier),
            plugins: Arc::new(PluginCatalog::default()),
            manager: ManagerOptions::default(),
        }
    }
}

/// Per-test state owned by exactly one running test
pub struct TestContext {
    info: ExecutionInfo,
    harness: HarnessConfig,
    services: Services,
    cleanups: CleanupStack,
    handlers: ExceptionHandlerChain,
    details: Vec<Detail>,
    default_temp_dir: Option<PathBuf>,
}

impl TestContext {
    pub fn new(name: impl Into<String>, harness: HarnessConfig) -> Self {
        Self {
            info: ExecutionInfo::new(name, getpid()),
            harness,
            services: Services::default(),
            cleanups: CleanupStack::new(),
            handlers: ExceptionHandlerChain::new(),
            details: Vec::new(),
            default_temp_dir: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.test_name
    }

    pub fn info(&self) -> &ExecutionInfo {
        &self.info
    }

    pub fn harness_config(&self) -> &HarnessConfig {
        &self.harness
    }

    /// Marks the rest of this test as running inside a spawned worker
    pub fn mark_spawned(&mut self) {
        self.info.kind = ExecutionKind::Spawned;
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    pub fn config(&self) -> &Arc<ConfigOverlay> {
        &self.services.config
    }

    /// Overrides configuration options for the rest of the test.
    ///
    /// Overrides are dropped by the config reset registered during setup.
    pub fn set_config(&self, overrides: &[(&str, &str)], group: Option<&str>) {
        for (key, value) in overrides {
            self.services.config.set_override(key, value, group);
        }
    }

    pub fn add_cleanup<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.cleanups.register(label, action);
    }

    pub fn add_on_exception(&mut self, name: impl Into<String>, handler: ExceptionHandler) {
        self.handlers.add_handler(name, handler);
    }

    pub fn add_detail(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.details.push(Detail::new(name, content));
    }

    pub fn details(&self) -> &[Detail] {
        &self.details
    }

    /// Creates a temporary directory removed during cleanup
    pub fn new_temp_dir(&mut self) -> Result<PathBuf> {
        let dir = TempDir::new()?;
        let path = dir.path().canonicalize()?;
        debug!("created temp dir {}", path.display());
        self.add_cleanup(format!("remove {}", path.display()), move || {
            dir.close()?;
            Ok(())
        });
        Ok(path)
    }

    /// The test's default temporary directory, created on first use and
    /// the same for the whole test
    pub fn default_temp_dir(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.default_temp_dir {
            return Ok(path.clone());
        }
        let path = self.new_temp_dir()?;
        self.default_temp_dir = Some(path.clone());
        Ok(path)
    }

    /// Absolute path for `filename` inside `root`, or inside the default temp dir
    pub fn temp_file_path(
        &mut self,
        filename: impl AsRef<Path>,
        root: Option<&Path>,
    ) -> Result<PathBuf> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => self.default_temp_dir()?,
        };
        Ok(root.join(filename))
    }

    pub(crate) fn dispatch_exception(&mut self, error: &TestError) -> HandlerReport {
        let mut report = self.handlers.dispatch(error, &self.info);
        self.details.append(&mut report.details);
        report
    }

    pub fn exception_handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn run_cleanups(&mut self) -> Vec<CleanupFailure> {
        self.cleanups.run_all()
    }

    pub(crate) fn take_details(&mut self) -> Vec<Detail> {
        std::mem::take(&mut self.details)
    }
}
