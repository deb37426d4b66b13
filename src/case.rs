use super::Result;
use crate::callbacks::CallbackRegistryIsolation;
use crate::config::ConfigService;
use crate::context::TestContext;
use crate::error::TestOutcome;
use crate::handlers::{check_for_exit, PostMortemDebugger};
use crate::manager::{PluginFactory, BUILTIN_PLUGIN};
use crate::messaging::{self, TransportStub, MESSAGING_GROUP};
use crate::monitor::ProcessMonitorRegistry;
use crate::plugin_fixture::SingletonResourceFixture;
use crate::policy;
use crate::random;
use crate::rpc;
use futures::future::BoxFuture;
use tracing::debug;

/// A test body; borrows the context for as long as its future runs
pub type TestBody =
    Box<dyn for<'a> FnOnce(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send>;

/// Extra setup step run after the built-in fixtures
pub type SetupHook = Box<dyn FnOnce(&mut TestContext) -> Result<()> + Send>;

/// How much isolation a test gets before its body runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupLevel {
    /// Debugger hook, exit check and a fresh random seed only
    Diet,
    /// Full isolation of config, transport, callbacks, monitors and policy
    Base,
}

/// Config group holding the external lock options
pub const LOCK_GROUP: &str = "concurrency";

const CONFIG_DEFAULTS: [(&str, &str, Option<&str>); 6] = [
    ("core_plugin", BUILTIN_PLUGIN, None),
    ("agent_down_time", "75", None),
    ("rpc_response_timeout", "60", None),
    ("notification_driver", "log", None),
    ("transport_driver", "rabbit", Some(MESSAGING_GROUP)),
    ("state_path", "/var/lib/testbed", None),
];

/// A named test with its setup choices
pub struct TestCase {
    name: String,
    level: SetupLevel,
    plugin_fixture: Option<SingletonResourceFixture>,
    notification_driver: bool,
    hooks: Vec<SetupHook>,
    body: TestBody,
}

impl TestCase {
    /// A test with full base isolation
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send + 'static,
    {
        Self {
            name: name.into(),
            level: SetupLevel::Base,
            plugin_fixture: None,
            notification_driver: false,
            hooks: Vec::new(),
            body: Box::new(body),
        }
    }

    /// A test with only the minimal setup
    pub fn diet<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send + 'static,
    {
        Self {
            level: SetupLevel::Diet,
            ..Self::new(name, body)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> SetupLevel {
        self.level
    }

    /// Installs the singleton fixture, forcing the named catalog plugin if any
    pub fn with_core_plugin(mut self, core_plugin: Option<&str>) -> Self {
        self.plugin_fixture = Some(SingletonResourceFixture::new(core_plugin));
        self
    }

    /// Installs the singleton fixture with the core plugin built by `factory`
    pub fn with_plugin_factory(mut self, factory: PluginFactory) -> Self {
        self.plugin_fixture = Some(SingletonResourceFixture::new(None).with_factory(factory));
        self
    }

    pub fn with_notification_driver(mut self) -> Self {
        self.notification_driver = true;
        self
    }

    pub fn with_setup<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut TestContext) -> Result<()> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Runs the setup for this case against `ctx`, returning the body.
    ///
    /// Stops at the first failing step; cleanups registered by earlier steps
    /// stay on the context.
    pub(crate) fn set_up(self, ctx: &mut TestContext) -> (Result<()>, TestBody) {
        let Self {
            level,
            plugin_fixture,
            notification_driver,
            hooks,
            body,
            ..
        } = self;
        let result = set_up(ctx, level, plugin_fixture, notification_driver, hooks);
        (result, body)
    }
}

fn set_up(
    ctx: &mut TestContext,
    level: SetupLevel,
    plugin_fixture: Option<SingletonResourceFixture>,
    notification_driver: bool,
    hooks: Vec<SetupHook>,
) -> Result<()> {
    if let Some(name) = ctx.harness_config().post_mortem_debugger.clone() {
        let debugger = PostMortemDebugger::from_name(&name)?;
        ctx.add_on_exception("post-mortem debugger", debugger.into_handler());
    }
    ctx.add_on_exception("check for exit", Box::new(check_for_exit));
    let seed = random::reset_random_seed();
    debug!("{} runs with random seed {}", ctx.name(), seed);

    if level == SetupLevel::Base {
        set_up_base(ctx)?;
    }

    if let Some(fixture) = plugin_fixture {
        fixture.install(ctx);
    }
    if notification_driver {
        messaging::setup_notification_driver(ctx);
    }
    for hook in hooks {
        hook(ctx)?;
    }
    Ok(())
}

fn set_up_base(ctx: &mut TestContext) -> Result<()> {
    let config = ctx.config().clone();
    for (key, value, group) in CONFIG_DEFAULTS {
        config.set_default(key, value, group);
    }
    ctx.add_cleanup("reset config", move || {
        config.reset();
        Ok(())
    });

    let state_path = ctx.default_temp_dir()?.to_string_lossy().into_owned();
    ctx.set_config(&[("state_path", state_path.as_str())], None);

    let lock_path = ctx.new_temp_dir()?.to_string_lossy().into_owned();
    ctx.set_config(&[("lock_path", lock_path.as_str())], Some(LOCK_GROUP));

    ProcessMonitorRegistry::install(ctx);
    TransportStub::install(ctx)?;
    ctx.add_cleanup("clear rpc consumer registry", || {
        rpc::clear_consumers();
        Ok(())
    });
    CallbackRegistryIsolation::install(ctx);
    policy::install(ctx);

    debug!("base isolation ready for {}", ctx.name());
    Ok(())
}
