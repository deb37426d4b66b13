use crate::infrastructure::{
    assert_failed_in, assert_passed, clean_plugin_factory, double_plugin_factory,
    leaky_plugin_factory, release_strays, HarnessFixture,
};
use anyhow::Result;
use futures::FutureExt;
use testbed::context::TestContext;
use testbed::manager::{self, CoreManager};
use testbed::{HarnessError, Phase, TestCase, TestOutcome};

async fn build_manager(ctx: &mut TestContext) -> TestOutcome {
    let manager = CoreManager::get_instance(ctx.services())?;
    tracing::debug!("using plugin {}", manager.plugin().name());
    Ok(())
}

/// A diet case that checks no manager or agent notifier survived the previous test
fn starts_clean() -> TestCase {
    TestCase::diet("starts_clean", |_ctx| {
        async move {
            assert!(!CoreManager::has_instance());
            assert_eq!(manager::agent_notifier_count(), 0);
            Ok(())
        }
        .boxed()
    })
}

/// A plugin still referenced after teardown fails the test when checking is on
#[tokio::test]
async fn test_leaked_plugin_is_reported() -> Result<()> {
    let harness = HarnessFixture::checking_deallocation();

    let case = TestCase::new("leaks_plugin", |ctx| build_manager(ctx).boxed())
        .with_plugin_factory(leaky_plugin_factory("leaky-checked"));
    let result = harness.run(case).await;
    release_strays("leaky-checked");

    let error = assert_failed_in(&result, Phase::Cleanup);
    assert!(matches!(
        error,
        Some(HarnessError::DeallocationLeak { resource }) if resource == "leaky-checked"
    ));
    assert!(result.detail("cleanup failure: clean up core plugin").is_some());
    assert_passed(&harness.run(starts_clean()).await);
    Ok(())
}

/// Without the toggle the same leak goes unnoticed
#[tokio::test]
async fn test_leak_ignored_without_check() -> Result<()> {
    let harness = HarnessFixture::new();

    let case = TestCase::new("leaks_unchecked", |ctx| build_manager(ctx).boxed())
        .with_plugin_factory(leaky_plugin_factory("leaky-unchecked"));
    let result = harness.run(case).await;
    release_strays("leaky-unchecked");

    assert_passed(&result);
    Ok(())
}

/// References held by agent notifiers are released before the check
#[tokio::test]
async fn test_agent_notifiers_are_reset() -> Result<()> {
    let harness = HarnessFixture::checking_deallocation();

    let case = TestCase::new("registers_notifier", |ctx| {
        async move {
            build_manager(ctx).await?;
            assert_eq!(manager::agent_notifier_count(), 1);
            Ok(())
        }
        .boxed()
    })
    .with_plugin_factory(clean_plugin_factory());

    assert_passed(&harness.run(case).await);
    assert_passed(&harness.run(starts_clean()).await);
    Ok(())
}

/// Test doubles may outlive the manager
#[tokio::test]
async fn test_test_double_is_exempt() -> Result<()> {
    let harness = HarnessFixture::checking_deallocation();

    let case = TestCase::new("leaks_double", |ctx| build_manager(ctx).boxed())
        .with_plugin_factory(double_plugin_factory());
    let result = harness.run(case).await;
    release_strays("double");

    assert_passed(&result);
    Ok(())
}

/// Teardown of a fixture whose manager was never built does nothing
#[tokio::test]
async fn test_unused_fixture_is_noop() -> Result<()> {
    let harness = HarnessFixture::checking_deallocation();

    let case =
        TestCase::new("never_builds", |_ctx| async move { Ok(()) }.boxed()).with_core_plugin(None);

    assert_passed(&harness.run(case).await);
    Ok(())
}
