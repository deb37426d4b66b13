use super::Result;
use crate::context::TestContext;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Restarts a dead external process, returning the new pid
pub type RespawnFn = Arc<dyn Fn() -> Result<Pid> + Send + Sync>;

/// What a monitor does when a watched process is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadProcessAction {
    /// Only report the dead process
    Log,
    /// Call the registered respawn function
    Respawn,
}

/// Configuration for process monitoring behavior
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often watched processes are checked, zero disables the worker
    pub check_interval: Duration,
    /// Action taken for a dead process
    pub action: DeadProcessAction,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            action: DeadProcessAction::Respawn,
        }
    }
}

/// Lifecycle of a monitor's background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Created, worker not started
    Idle,
    /// Worker running
    Running,
    /// Worker stopped, terminal
    Stopped,
}

struct WatchedProcess {
    pid: Pid,
    respawn: Option<RespawnFn>,
}

/// Supervises external processes from a background worker.
///
/// The worker is started through a [`MonitorEntryPoint`] so a test harness can
/// observe every worker the code under test creates.
pub struct ProcessMonitor {
    id: Uuid,
    config: MonitorConfig,
    watched: Mutex<HashMap<String, WatchedProcess>>,
    state: Mutex<MonitorState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle on a monitor worker
pub type MonitorHandle = Arc<ProcessMonitor>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessMonitor {
    /// Creates a monitor and starts its checking worker when an interval is set
    ///
    /// # Arguments
    /// * `config` - Monitoring configuration
    /// * `entry_point` - Entry point used to start the worker
    pub fn new(config: MonitorConfig, entry_point: &MonitorEntryPoint) -> Result<MonitorHandle> {
        let monitor = Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            watched: Mutex::new(HashMap::new()),
            state: Mutex::new(MonitorState::Idle),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        });

        if !monitor.config.check_interval.is_zero() {
            entry_point.spawn_checking_task(&monitor)?;
        }

        Ok(monitor)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> MonitorState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Starts watching a process under a service name
    pub fn register(&self, service: impl Into<String>, pid: Pid, respawn: Option<RespawnFn>) {
        let service = service.into();
        debug!("monitor {} watching {} (pid {})", self.id, service, pid);
        lock(&self.watched).insert(service, WatchedProcess { pid, respawn });
    }

    pub fn unregister(&self, service: &str) {
        lock(&self.watched).remove(service);
    }

    pub fn watched_pid(&self, service: &str) -> Option<Pid> {
        lock(&self.watched).get(service).map(|p| p.pid)
    }

    /// Spawns the periodic checking worker on the current tokio runtime
    pub fn start_checking_task(self: &Arc<Self>) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            MonitorState::Running => return Ok(()),
            MonitorState::Stopped => {
                return Err(eyre::eyre!("monitor {} was stopped and cannot restart", self.id))
            }
            MonitorState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current()?;
        let monitor: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.config.check_interval;
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match monitor.upgrade() {
                            Some(monitor) => monitor.check_child_processes(),
                            None => break,
                        }
                    }
                }
            }
        });

        *lock(&self.worker) = Some(handle);
        *state = MonitorState::Running;
        info!("monitor {} started, checking every {:?}", self.id, period);
        Ok(())
    }

    /// Stops the worker. Stopping an idle or already stopped monitor is a no-op.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if *state == MonitorState::Running {
            self.cancel.cancel();
            if let Some(worker) = lock(&self.worker).take() {
                worker.abort();
            }
            info!("monitor {} stopped", self.id);
        }
        *state = MonitorState::Stopped;
    }

    /// Checks every watched process once and applies the configured action
    pub fn check_child_processes(&self) {
        let dead: Vec<(String, Option<RespawnFn>)> = lock(&self.watched)
            .iter()
            .filter(|(_, process)| !is_alive(process.pid))
            .map(|(service, process)| (service.clone(), process.respawn.clone()))
            .collect();

        // Respawn functions run without the lock held
        for (service, respawn) in dead {
            error!("{} is not running", service);
            if self.config.action != DeadProcessAction::Respawn {
                continue;
            }
            let Some(respawn) = respawn else {
                warn!("no respawn function for {}", service);
                continue;
            };
            match respawn() {
                Ok(pid) => {
                    info!("respawned {} with pid {}", service, pid);
                    if let Some(process) = lock(&self.watched).get_mut(&service) {
                        process.pid = pid;
                    }
                }
                Err(e) => error!("failed to respawn {}: {:#}", service, e),
            }
        }
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

fn is_alive(pid: Pid) -> bool {
    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: the process exists but belongs to someone else
        Err(_) => true,
    }
}

/// Starts monitor workers on behalf of the code under test
pub trait MonitorSpawner: Send + Sync {
    fn spawn_checking_task(&self, monitor: &MonitorHandle) -> Result<()>;
}

/// Spawns workers directly on the tokio runtime
pub struct TokioSpawner;

impl MonitorSpawner for TokioSpawner {
    fn spawn_checking_task(&self, monitor: &MonitorHandle) -> Result<()> {
        monitor.start_checking_task()
    }
}

/// The substitutable function code under test calls to start a monitor worker
pub struct MonitorEntryPoint {
    current: RwLock<Arc<dyn MonitorSpawner>>,
}

impl Default for MonitorEntryPoint {
    fn default() -> Self {
        Self::new(Arc::new(TokioSpawner))
    }
}

impl MonitorEntryPoint {
    pub fn new(spawner: Arc<dyn MonitorSpawner>) -> Self {
        Self {
            current: RwLock::new(spawner),
        }
    }

    pub fn spawn_checking_task(&self, monitor: &MonitorHandle) -> Result<()> {
        self.current().spawn_checking_task(monitor)
    }

    /// The spawner currently installed
    pub fn current(&self) -> Arc<dyn MonitorSpawner> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the spawner, returning the previous one
    pub fn substitute(&self, spawner: Arc<dyn MonitorSpawner>) -> Arc<dyn MonitorSpawner> {
        std::mem::replace(
            &mut *self.current.write().unwrap_or_else(PoisonError::into_inner),
            spawner,
        )
    }
}

/// Records every monitor started during a test so teardown can stop them all
pub struct ProcessMonitorRegistry {
    inner: Arc<dyn MonitorSpawner>,
    instances: Mutex<Vec<MonitorHandle>>,
}

impl ProcessMonitorRegistry {
    /// Substitutes a recording spawner into the test's entry point.
    ///
    /// The registered cleanup stops every recorded monitor and puts the
    /// previous spawner back.
    pub fn install(ctx: &mut TestContext) -> Arc<Self> {
        let entry_point = ctx.services().monitors.clone();
        let previous = entry_point.current();
        let registry = Arc::new(Self {
            inner: previous.clone(),
            instances: Mutex::new(Vec::new()),
        });
        entry_point.substitute(registry.clone());

        let recorded = registry.clone();
        ctx.add_cleanup("stop process monitors", move || {
            recorded.stop_all();
            entry_point.substitute(previous);
            Ok(())
        });

        registry
    }

    /// Stops every recorded monitor
    pub fn stop_all(&self) {
        let instances = std::mem::take(&mut *lock(&self.instances));
        if !instances.is_empty() {
            debug!("stopping {} captured monitors", instances.len());
        }
        for monitor in instances {
            monitor.stop();
        }
    }

    pub fn instances(&self) -> Vec<MonitorHandle> {
        lock(&self.instances).clone()
    }
}

impl MonitorSpawner for ProcessMonitorRegistry {
    fn spawn_checking_task(&self, monitor: &MonitorHandle) -> Result<()> {
        self.inner.spawn_checking_task(monitor)?;
        lock(&self.instances).push(monitor.clone());
        Ok(())
    }
}
