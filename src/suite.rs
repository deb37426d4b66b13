//! Isolation checks bundled with the `testbed` binary.

use super::Result;
use crate::callbacks::{self, Payload};
use crate::case::TestCase;
use crate::config::ConfigService;
use crate::context::TestContext;
use crate::error::TestOutcome;
use crate::manager::{CoreManager, BUILTIN_PLUGIN};
use crate::messaging::{MessagingError, RpcClient};
use crate::monitor::{MonitorConfig, ProcessMonitor};
use crate::names;
use crate::policy;
use crate::rpc;
use eyre::eyre;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every bundled check, in run order
pub fn self_check_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("config_is_isolated", |ctx| config_is_isolated(ctx).boxed()),
        TestCase::new("state_path_points_at_temp_dir", |ctx| {
            state_path_points_at_temp_dir(ctx).boxed()
        }),
        TestCase::new("callbacks_resolve_to_private_registry", |_ctx| {
            callbacks_resolve_to_private_registry().boxed()
        }),
        TestCase::new("core_manager_is_built_lazily", |ctx| {
            core_manager_is_built_lazily(ctx).boxed()
        })
        .with_core_plugin(None),
        TestCase::new("monitors_are_captured", |ctx| monitors_are_captured(ctx).boxed()),
        TestCase::new("rpc_fails_fast", |ctx| rpc_fails_fast(ctx).boxed()),
        TestCase::new("policy_is_initialized", |_ctx| policy_is_initialized().boxed()),
        TestCase::new("notifications_are_recorded", |ctx| notifications_are_recorded(ctx).boxed())
            .with_notification_driver(),
        TestCase::diet("device_names_fit", |_ctx| device_names_fit().boxed()),
    ]
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(eyre!(message()))
    }
}

async fn config_is_isolated(ctx: &mut TestContext) -> TestOutcome {
    check(ctx.config().get("debug", None).is_none(), || "override leaked into this test".into())?;
    ctx.set_config(&[("debug", "true")], None);
    check(ctx.config().get_parsed::<bool>("debug", None)?, || "override not applied".into())?;
    Ok(())
}

async fn state_path_points_at_temp_dir(ctx: &mut TestContext) -> TestOutcome {
    let temp_dir = ctx.default_temp_dir()?;
    let state_path = ctx
        .config()
        .get("state_path", None)
        .ok_or_else(|| eyre!("state_path unset"))?;
    check(state_path == temp_dir.to_string_lossy(), || format!("state_path is {state_path}"))?;

    let file = ctx.temp_file_path("agent.db", None)?;
    std::fs::write(&file, b"state")?;
    check(file.starts_with(&temp_dir), || format!("{} outside the temp dir", file.display()))?;
    Ok(())
}

async fn callbacks_resolve_to_private_registry() -> TestOutcome {
    check(callbacks::is_substituted(), || "no private callbacks manager installed".into())?;
    check(callbacks::registry().subscriber_count() == 0, || "inherited subscriptions".into())?;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    callbacks::subscribe(
        "self-check",
        "router",
        "after_create",
        Arc::new(move |_: &str, _: &str, _: &Payload| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    callbacks::notify("router", "after_create", &Payload::new())?;
    check(calls.load(Ordering::SeqCst) == 1, || "callback not invoked".into())?;
    Ok(())
}

async fn core_manager_is_built_lazily(ctx: &mut TestContext) -> TestOutcome {
    check(!CoreManager::has_instance(), || "core manager constructed before first use".into())?;
    let manager = CoreManager::get_instance(ctx.services())?;
    let plugin = manager.plugin();
    check(plugin.name() == BUILTIN_PLUGIN, || format!("unexpected plugin {}", plugin.name()))?;
    check(manager.service_plugin_names().is_empty(), || "service plugins loaded".into())?;
    check(manager.status_check().is_none(), || "periodic checks started".into())?;
    Ok(())
}

async fn monitors_are_captured(ctx: &mut TestContext) -> TestOutcome {
    let config = MonitorConfig {
        check_interval: Duration::from_secs(30),
        ..MonitorConfig::default()
    };
    let monitor = ProcessMonitor::new(config, &ctx.services().monitors)?;
    check(monitor.is_running(), || "monitor worker not started".into())?;
    // Teardown still reaches the worker after the test lets go of it
    drop(monitor);
    Ok(())
}

async fn rpc_fails_fast(ctx: &mut TestContext) -> TestOutcome {
    check(rpc::is_initialized(), || "rpc transport not initialized".into())?;
    let client = RpcClient::new(ctx.services(), "q-l3-plugin")?;
    match client.call("sync_routers").await {
        Err(MessagingError::Timeout { .. }) => Ok(()),
        other => Err(eyre!("expected an immediate timeout, got {:?}", other).into()),
    }
}

async fn policy_is_initialized() -> TestOutcome {
    check(policy::enforce("get_network", &["reader"])?, || "reader denied get_network".into())?;
    check(!policy::enforce("create_network:shared", &["member"])?, || {
        "member allowed a shared network".into()
    })?;
    Ok(())
}

async fn notifications_are_recorded(ctx: &mut TestContext) -> TestOutcome {
    let driver = ctx.config().get("notification_driver", None);
    check(driver.as_deref() == Some("fake"), || format!("notification driver is {driver:?}"))?;
    ctx.services().notifier.notify("port.create.end", &Payload::new());
    Ok(())
}

async fn device_names_fit() -> TestOutcome {
    let names = names::get_related_rand_device_names(&["qr-", "qg-"])?;
    check(names.iter().all(|n| n.len() == names::DEVICE_NAME_MAX_LEN), || {
        format!("bad device names {names:?}")
    })?;
    Ok(())
}
