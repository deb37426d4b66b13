use super::Result;
use crate::config::ConfigService;
use crate::context::TestContext;
use crate::error::HarnessError;
use crate::manager::{self, CoreManager, CorePlugin, PluginFactory};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Tracks whether a plugin was released once the harness dropped its references
pub struct DeallocationProbe {
    target: Weak<dyn CorePlugin>,
    resource: String,
}

impl DeallocationProbe {
    pub fn capture(plugin: &Arc<dyn CorePlugin>) -> Self {
        Self {
            target: Arc::downgrade(plugin),
            resource: plugin.name().to_string(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.target.strong_count() == 0
    }

    /// Fails if anything still holds the plugin, unless it is a test double
    pub fn verify(&self) -> std::result::Result<(), HarnessError> {
        match self.target.upgrade() {
            None => Ok(()),
            Some(plugin) if plugin.is_test_double() => {
                debug!("test double {} still referenced, ignoring", self.resource);
                Ok(())
            }
            Some(plugin) => {
                error!(
                    "plugin {} still has {} strong references",
                    self.resource,
                    Arc::strong_count(&plugin) - 1
                );
                Err(HarnessError::DeallocationLeak {
                    resource: self.resource.clone(),
                })
            }
        }
    }
}

/// Drops the process-wide core manager, optionally verifying that its core
/// plugin went with it
pub fn cleanup_core_plugin(check_deallocation: bool) -> Result<()> {
    if !CoreManager::has_instance() {
        return Ok(());
    }

    // Agent notifiers may reference the plugin
    manager::reset_agent_notifiers();

    let probe = CoreManager::instance()
        .filter(|_| check_deallocation)
        .map(|manager| DeallocationProbe::capture(&manager.plugin()));

    if let Some(manager) = CoreManager::clear_instance() {
        drop(manager);
    }

    if let Some(probe) = probe {
        probe.verify()?;
        debug!("plugin {} released", probe.resource);
    }
    Ok(())
}

/// Gives one test a fresh core manager built from a chosen plugin
pub struct SingletonResourceFixture {
    core_plugin: Option<String>,
    factory: Option<PluginFactory>,
}

impl SingletonResourceFixture {
    /// `core_plugin` names a catalog plugin; `None` keeps the configured default
    pub fn new(core_plugin: Option<&str>) -> Self {
        Self {
            core_plugin: core_plugin.map(String::from),
            factory: None,
        }
    }

    /// Builds the core plugin with `factory` instead of the catalog
    pub fn with_factory(mut self, factory: PluginFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Prepares the context so the next manager built is a test manager.
    ///
    /// The teardown is registered before anything is constructed, so it
    /// also runs when setup fails later on.
    pub fn install(self, ctx: &mut TestContext) {
        let check = ctx.harness_config().check_plugin_deallocation;
        ctx.add_cleanup("clean up core plugin", move || cleanup_core_plugin(check));

        if let Some(name) = &self.core_plugin {
            ctx.config().set_override("core_plugin", name, None);
        }

        let options = &mut ctx.services_mut().manager;
        options.load_default_service_plugins = false;
        options.start_periodic_checks = false;
        if let Some(factory) = self.factory {
            options.factory_override = Some(factory);
        }
    }
}
