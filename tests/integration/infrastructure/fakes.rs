use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use testbed::context::Services;
use testbed::manager::{self, CorePlugin, PluginFactory};

/// References deliberately kept alive past teardown
static STRAYS: Lazy<Mutex<Vec<Arc<dyn CorePlugin>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn keep_stray(plugin: &Arc<dyn CorePlugin>) {
    STRAYS.lock().unwrap().push(plugin.clone());
}

/// Drops every stray reference whose plugin has the given name
pub fn release_strays(name: &str) {
    STRAYS.lock().unwrap().retain(|plugin| plugin.name() != name);
}

/// Plugin whose factory parks a reference in a static
pub struct LeakyPlugin {
    name: &'static str,
}

impl CorePlugin for LeakyPlugin {
    fn name(&self) -> &str {
        self.name
    }
}

/// Plugin that registers itself as an agent notifier while loading
pub struct CleanPlugin;

impl CorePlugin for CleanPlugin {
    fn name(&self) -> &str {
        "clean"
    }
}

/// Test double that is leaked on purpose
pub struct DoublePlugin;

impl CorePlugin for DoublePlugin {
    fn name(&self) -> &str {
        "double"
    }

    fn is_test_double(&self) -> bool {
        true
    }
}

/// Each scenario picks its own name so releasing strays never touches another test's plugin
pub fn leaky_plugin_factory(name: &'static str) -> PluginFactory {
    Arc::new(move |_: &Services| -> testbed::Result<Arc<dyn CorePlugin>> {
        let plugin: Arc<dyn CorePlugin> = Arc::new(LeakyPlugin { name });
        keep_stray(&plugin);
        Ok(plugin)
    })
}

pub fn clean_plugin_factory() -> PluginFactory {
    Arc::new(|_: &Services| -> testbed::Result<Arc<dyn CorePlugin>> {
        let plugin = Arc::new(CleanPlugin);
        manager::register_agent_notifier("dhcp", plugin.clone());
        Ok(plugin)
    })
}

pub fn double_plugin_factory() -> PluginFactory {
    Arc::new(|_: &Services| -> testbed::Result<Arc<dyn CorePlugin>> {
        let plugin: Arc<dyn CorePlugin> = Arc::new(DoublePlugin);
        keep_stray(&plugin);
        Ok(plugin)
    })
}
