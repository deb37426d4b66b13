//! The process-wide core manager and the plugins it loads.

use super::Result;
use crate::config::ConfigService;
use crate::context::Services;
use crate::error::HarnessError;
use crate::monitor::{DeadProcessAction, MonitorConfig, MonitorHandle, ProcessMonitor};
use crate::singleton::SingletonSlot;
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// A loadable plugin
pub trait CorePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// True for plugins that stand in for a real backend in tests
    fn is_test_double(&self) -> bool {
        false
    }
}

/// Builds a plugin against the test's services
pub type PluginFactory = Arc<dyn Fn(&Services) -> Result<Arc<dyn CorePlugin>> + Send + Sync>;

/// Name of the plugin loaded when none is configured
pub const BUILTIN_PLUGIN: &str = "builtin";

/// Service plugins loaded alongside the core plugin unless disabled
pub const DEFAULT_SERVICE_PLUGINS: [&str; 4] =
    ["auto_allocate", "network_ip_availability", "tag", "timestamp"];

const DEFAULT_AGENT_DOWN_TIME_SECS: u64 = 75;

/// A plugin with no behavior beyond its name
#[derive(Debug)]
pub struct BuiltinPlugin {
    name: String,
}

impl BuiltinPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CorePlugin for BuiltinPlugin {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Factories keyed by plugin name
pub struct PluginCatalog {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl Default for PluginCatalog {
    fn default() -> Self {
        let catalog = Self {
            factories: RwLock::new(HashMap::new()),
        };
        catalog.register(
            BUILTIN_PLUGIN,
            Arc::new(|_: &Services| -> Result<Arc<dyn CorePlugin>> {
                Ok(Arc::new(BuiltinPlugin::new(BUILTIN_PLUGIN)))
            }),
        );
        catalog
    }
}

impl PluginCatalog {
    pub fn register(&self, name: &str, factory: PluginFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    pub fn build(&self, name: &str, services: &Services) -> Result<Arc<dyn CorePlugin>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownPlugin(name.to_string()))?;
        factory(services)
    }
}

/// How the next core manager is constructed
#[derive(Clone)]
pub struct ManagerOptions {
    pub load_default_service_plugins: bool,
    pub start_periodic_checks: bool,
    /// Used instead of the configured core plugin when set
    pub factory_override: Option<PluginFactory>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            load_default_service_plugins: true,
            start_periodic_checks: true,
            factory_override: None,
        }
    }
}

static INSTANCE: SingletonSlot<CoreManager> = SingletonSlot::new("core manager");

type AgentNotifier = Arc<dyn Any + Send + Sync>;

static AGENT_NOTIFIERS: Lazy<Mutex<HashMap<String, AgentNotifier>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers the notifier used for agents of `agent_type`. Plugins call
/// this while loading and it outlives the plugin unless reset.
pub fn register_agent_notifier(agent_type: &str, notifier: AgentNotifier) {
    AGENT_NOTIFIERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(agent_type.to_string(), notifier);
}

pub fn agent_notifier_count() -> usize {
    AGENT_NOTIFIERS.lock().unwrap_or_else(PoisonError::into_inner).len()
}

/// Empties the agent notifier table
pub fn reset_agent_notifiers() {
    AGENT_NOTIFIERS.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

/// Owns the core plugin and the service plugins for the whole process
pub struct CoreManager {
    plugin: Arc<dyn CorePlugin>,
    service_plugins: BTreeMap<String, Arc<dyn CorePlugin>>,
    status_check: Option<MonitorHandle>,
}

impl CoreManager {
    fn build(services: &Services) -> Result<Self> {
        let options = &services.manager;
        let plugin = match &options.factory_override {
            Some(factory) => factory(services)?,
            None => {
                let name = services
                    .config
                    .get("core_plugin", None)
                    .unwrap_or_else(|| BUILTIN_PLUGIN.to_string());
                services.plugins.build(&name, services)?
            }
        };
        info!("Loading core plugin: {}", plugin.name());

        let mut service_plugins = BTreeMap::new();
        if options.load_default_service_plugins {
            for name in DEFAULT_SERVICE_PLUGINS {
                let service_plugin: Arc<dyn CorePlugin> = if services.plugins.contains(name) {
                    services.plugins.build(name, services)?
                } else {
                    Arc::new(BuiltinPlugin::new(name))
                };
                debug!("loaded service plugin {}", name);
                service_plugins.insert(name.to_string(), service_plugin);
            }
        }

        let status_check = if options.start_periodic_checks {
            let down_time = match services.config.get("agent_down_time", None) {
                Some(_) => services.config.get_parsed::<u64>("agent_down_time", None)?,
                None => DEFAULT_AGENT_DOWN_TIME_SECS,
            };
            let config = MonitorConfig {
                check_interval: Duration::from_secs((down_time / 2).max(1)),
                action: DeadProcessAction::Log,
            };
            Some(ProcessMonitor::new(config, &services.monitors)?)
        } else {
            None
        };

        Ok(Self {
            plugin,
            service_plugins,
            status_check,
        })
    }

    /// Returns the process-wide manager, constructing it on first access
    pub fn get_instance(services: &Services) -> Result<Arc<CoreManager>> {
        INSTANCE.get_or_try_init(|| Self::build(services).map(Arc::new))
    }

    /// The manager if one has been constructed
    pub fn instance() -> Option<Arc<CoreManager>> {
        INSTANCE.get()
    }

    pub fn has_instance() -> bool {
        INSTANCE.has_instance()
    }

    /// Empties the slot, handing back the manager it held
    pub fn clear_instance() -> Option<Arc<CoreManager>> {
        INSTANCE.clear()
    }

    pub fn slot() -> &'static SingletonSlot<CoreManager> {
        &INSTANCE
    }

    pub fn plugin(&self) -> Arc<dyn CorePlugin> {
        self.plugin.clone()
    }

    pub fn service_plugin(&self, name: &str) -> Option<Arc<dyn CorePlugin>> {
        self.service_plugins.get(name).cloned()
    }

    pub fn service_plugin_names(&self) -> Vec<&str> {
        self.service_plugins.keys().map(String::as_str).collect()
    }

    pub fn status_check(&self) -> Option<&MonitorHandle> {
        self.status_check.as_ref()
    }
}

impl Drop for CoreManager {
    fn drop(&mut self) {
        if let Some(monitor) = self.status_check.take() {
            monitor.stop();
        }
        debug!("core manager for {} dropped", self.plugin.name());
    }
}
