use crate::infrastructure::{assert_exited, assert_failed_in, assert_passed, HarnessFixture};
use anyhow::Result;
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use testbed::handlers::Verdict;
use testbed::{request_exit, HarnessError, Phase, TestCase, TestError};

/// Even a zero exit code fails a test in the process that started it
#[tokio::test]
async fn test_exit_zero_fails_in_root() -> Result<()> {
    let harness = HarnessFixture::new();

    let result = harness
        .run(TestCase::new("exits_zero", |_ctx| async move { Err(TestError::exit(0)) }.boxed()))
        .await;

    let error = assert_failed_in(&result, Phase::Body);
    assert!(matches!(error, Some(HarnessError::ExitDuringTest { code: 0 })));
    Ok(())
}

/// An exit requested deep inside the code under test is caught the same way
#[tokio::test]
async fn test_nested_exit_request_fails() -> Result<()> {
    let harness = HarnessFixture::new();

    fn shut_down_agent() {
        request_exit(2)
    }

    let result = harness
        .run(TestCase::diet("nested_exit", |_ctx| {
            async move {
                shut_down_agent();
                Ok(())
            }
            .boxed()
        }))
        .await;

    let error = assert_failed_in(&result, Phase::Body);
    assert!(matches!(error, Some(HarnessError::ExitDuringTest { code: 2 })));
    Ok(())
}

/// In a spawned worker the exit request is handed back to the caller
#[tokio::test]
async fn test_exit_propagates_from_spawned_worker() -> Result<()> {
    let harness = HarnessFixture::new();

    let result = harness
        .run(TestCase::new("worker_exits", |ctx| {
            async move {
                ctx.mark_spawned();
                Err(TestError::exit(3))
            }
            .boxed()
        }))
        .await;

    assert_exited(&result, 3);
    assert!(!result.is_success());
    Ok(())
}

/// A propagated exit ends the run; the worker does not go on to later tests
#[tokio::test]
async fn test_propagated_exit_stops_the_run() -> Result<()> {
    let harness = HarnessFixture::new();
    let ran_after = Arc::new(Mutex::new(false));

    let flag = ran_after.clone();
    let cases = vec![
        TestCase::diet("child_exits", |ctx| {
            async move {
                ctx.mark_spawned();
                Err(TestError::exit(0))
            }
            .boxed()
        }),
        TestCase::diet("after_child", move |_ctx| {
            async move {
                *flag.lock().unwrap() = true;
                Ok(())
            }
            .boxed()
        }),
    ];

    let summary = harness.run_all(cases).await;

    assert!(!*ran_after.lock().unwrap(), "tests after the exit must not run");
    assert_eq!(summary.results.len(), 1);
    assert_exited(&summary.results[0], 0);
    assert_eq!(summary.exit, Some(0));
    assert_eq!(summary.failed(), 0);
    Ok(())
}

/// Failures in root tests do not stop the run
#[tokio::test]
async fn test_failures_do_not_stop_the_run() -> Result<()> {
    let harness = HarnessFixture::new();

    let cases = vec![
        TestCase::diet("exits_in_root", |_ctx| async move { Err(TestError::exit(1)) }.boxed()),
        TestCase::diet("still_runs", |_ctx| async move { Ok(()) }.boxed()),
    ];

    let summary = harness.run_all(cases).await;

    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.passed(), 1);
    assert!(summary.exit.is_none());
    Ok(())
}

/// A broken handler becomes a detail and the primary failure is kept
#[tokio::test]
async fn test_handler_failure_does_not_mask_failure() -> Result<()> {
    let harness = HarnessFixture::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let observed = seen.clone();
    let case = TestCase::diet("handler_breaks", |_ctx| {
        async move { Err(eyre::eyre!("port binding failed").into()) }.boxed()
    })
    .with_setup(|ctx| {
        ctx.add_on_exception("collect logs", Box::new(|_, _| Err(eyre::eyre!("log dir missing"))));
        Ok(())
    })
    .with_setup(move |ctx| {
        ctx.add_on_exception(
            "record",
            Box::new(move |error, _| {
                observed.lock().unwrap().push(error.to_string());
                Ok(Verdict::Continue)
            }),
        );
        Ok(())
    });

    let result = harness.run(case).await;

    assert_failed_in(&result, Phase::Body);
    assert!(result.failure().unwrap().error.to_string().contains("port binding failed"));
    let detail = result
        .detail("failure in exception handler collect logs")
        .expect("handler failure detail");
    assert!(detail.content.contains("log dir missing"));
    assert_eq!(seen.lock().unwrap().len(), 1, "handlers after a broken one still run");
    Ok(())
}

/// Handlers are not consulted for passing tests
#[tokio::test]
async fn test_handlers_skip_passing_tests() -> Result<()> {
    let harness = HarnessFixture::new();
    let calls = Arc::new(Mutex::new(0));

    let counter = calls.clone();
    let case = TestCase::diet("passes", |_ctx| async move { Ok(()) }.boxed()).with_setup(
        move |ctx| {
            ctx.add_on_exception(
                "count",
                Box::new(move |_, _| {
                    *counter.lock().unwrap() += 1;
                    Ok(Verdict::Continue)
                }),
            );
            Ok(())
        },
    );

    assert_passed(&harness.run(case).await);
    assert_eq!(*calls.lock().unwrap(), 0);
    Ok(())
}
