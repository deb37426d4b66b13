use crate::infrastructure::{assert_passed, HarnessFixture};
use anyhow::Result;
use futures::FutureExt;
use nix::unistd::Pid;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testbed::monitor::{
    DeadProcessAction, MonitorConfig, MonitorEntryPoint, MonitorHandle, MonitorState,
    ProcessMonitor, RespawnFn,
};
use testbed::TestCase;

fn config(check_interval: Duration) -> MonitorConfig {
    MonitorConfig {
        check_interval,
        action: DeadProcessAction::Respawn,
    }
}

/// Every monitor started during a test is stopped once it ends
#[tokio::test]
async fn test_monitors_stopped_after_test() -> Result<()> {
    let harness = HarnessFixture::new();
    let started: Arc<Mutex<Vec<MonitorHandle>>> = Arc::new(Mutex::new(Vec::new()));

    let handles = started.clone();
    let result = harness
        .run(TestCase::new("starts_monitors", move |ctx| {
            async move {
                for _ in 0..3 {
                    let config = config(Duration::from_secs(60));
                    let monitor = ProcessMonitor::new(config, &ctx.services().monitors)?;
                    assert!(monitor.is_running());
                    handles.lock().unwrap().push(monitor);
                }
                Ok(())
            }
            .boxed()
        }))
        .await;

    assert_passed(&result);
    let handles = started.lock().unwrap();
    assert_eq!(handles.len(), 3);
    assert!(handles.iter().all(|m| m.state() == MonitorState::Stopped));
    Ok(())
}

/// A zero interval never starts a worker, and stopping it later is harmless
#[tokio::test]
async fn test_unstarted_monitor_stop_is_noop() -> testbed::Result<()> {
    let monitor = ProcessMonitor::new(config(Duration::ZERO), &MonitorEntryPoint::default())?;
    assert_eq!(monitor.state(), MonitorState::Idle);

    monitor.stop();
    monitor.stop();
    assert!(!monitor.is_running());
    Ok(())
}

/// A dead child process is respawned by the checking pass
#[tokio::test]
async fn test_dead_process_is_respawned() -> testbed::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut short_lived = Command::new("true").spawn()?;
    let dead_pid = Pid::from_raw(short_lived.id() as i32);
    short_lived.wait()?;

    let respawned = Arc::new(AtomicUsize::new(0));
    let replacement = Arc::new(Mutex::new(None));

    let counter = respawned.clone();
    let child_slot = replacement.clone();
    let respawn: RespawnFn = Arc::new(move || -> testbed::Result<Pid> {
        counter.fetch_add(1, Ordering::SeqCst);
        let child = Command::new("sleep").arg("30").spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        *child_slot.lock().unwrap() = Some(child);
        Ok(pid)
    });

    let monitor = ProcessMonitor::new(config(Duration::ZERO), &MonitorEntryPoint::default())?;
    monitor.register("dhcp-agent", dead_pid, Some(respawn));
    monitor.check_child_processes();

    assert_eq!(respawned.load(Ordering::SeqCst), 1);
    let new_pid = monitor.watched_pid("dhcp-agent").expect("still watched");
    assert_ne!(new_pid, dead_pid);

    // A live process is left alone
    monitor.check_child_processes();
    assert_eq!(respawned.load(Ordering::SeqCst), 1);

    if let Some(mut child) = replacement.lock().unwrap().take() {
        child.kill()?;
        child.wait()?;
    }
    Ok(())
}
