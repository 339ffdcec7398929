//! WorkerSupervisor - keeps the bundled background worker running next to the UI.
//!
//! The worker is a long-lived executable shipped beside the host binary. The
//! supervisor guarantees at most one monitored instance:
//!
//! - `start()`: clears our previous instance and any stale process with the
//!   same name, then spawns a fresh one owned by a monitor task
//! - `stop()`: asks the monitor to terminate the child, then force-kills any
//!   same-named leftovers
//! - `status()`: snapshot of the monitored process
//!
//! There is no restart policy. An unexpected exit is logged and reflected in
//! the status snapshot only.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::api::types::{ApiError, ProcessHandle};
use crate::config::WorkerConfig;

/// Grace period stale processes get before they are force-killed
const SWEEP_WAIT: Duration = Duration::from_secs(3);
const SWEEP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra time on top of the stop timeouts before the monitor is abandoned
const MONITOR_JOIN_SLACK: Duration = Duration::from_secs(1);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Supervisor for the single background worker process.
pub struct WorkerSupervisor {
    executable: PathBuf,
    working_dir: PathBuf,
    graceful_stop: Duration,
    kill_wait: Duration,
    /// Serializes start/stop and holds the monitored instance
    current: Mutex<Option<MonitoredWorker>>,
}

struct MonitoredWorker {
    status: watch::Receiver<ProcessHandle>,
    stop_tx: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

impl WorkerSupervisor {
    pub fn new(executable: PathBuf, working_dir: PathBuf, config: &WorkerConfig) -> Self {
        Self {
            executable,
            working_dir,
            graceful_stop: Duration::from_millis(config.graceful_stop_ms),
            kill_wait: Duration::from_millis(config.kill_wait_ms),
            current: Mutex::new(None),
        }
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }

    /// Start the worker, replacing any running instance.
    ///
    /// # Returns
    /// * `Ok(Some(handle))` - worker spawned
    /// * `Ok(None)` - executable not installed; nothing was started
    /// * `Err(ApiError::IoFailure)` - spawn failed
    pub async fn start(&self) -> Result<Option<ProcessHandle>, ApiError> {
        let mut current = self.current.lock().await;

        if !self.executable.is_file() {
            log::warn!(
                "Worker executable not found, skipping start: {}",
                self.executable.display()
            );
            return Ok(None);
        }

        if let Some(previous) = current.take() {
            log::info!("Replacing running worker: pid={}", previous.pid());
            self.shutdown(previous).await;
        }

        let name = self.process_name();
        let swept = sweep_same_name(&name, SWEEP_WAIT).await;
        if swept > 0 {
            log::info!("Cleared {swept} stale worker process(es) before start");
        }

        let mut cmd = Command::new(&self.executable);
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| ApiError::IoFailure {
            message: format!("Failed to spawn worker {}: {e}", self.executable.display()),
        })?;

        let pid = child.id().ok_or_else(|| ApiError::IoFailure {
            message: "Worker exited before its pid could be read".to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, log::Level::Info));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, log::Level::Warn));
        }

        let handle = ProcessHandle {
            pid,
            started_at_ms: now_ms(),
            exited: false,
            exit_code: None,
        };

        let (status_tx, status_rx) = watch::channel(handle.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            status_tx,
            stop_rx,
            self.graceful_stop,
            self.kill_wait,
        ));

        log::info!(
            "Worker started: pid={pid}, exe={}, cwd={}",
            self.executable.display(),
            self.working_dir.display()
        );

        *current = Some(MonitoredWorker {
            status: status_rx,
            stop_tx,
            monitor,
        });

        Ok(Some(handle))
    }

    /// Stop the worker and clear same-named leftovers.
    ///
    /// Best-effort and bounded; failures are logged only.
    pub async fn stop(&self) {
        let mut current = self.current.lock().await;

        if let Some(worker) = current.take() {
            self.shutdown(worker).await;
        }

        let swept = sweep_same_name(&self.process_name(), Duration::ZERO).await;
        if swept > 0 {
            log::info!("Force-killed {swept} leftover worker process(es)");
        }
    }

    /// Snapshot of the monitored worker, if one was started and not stopped.
    pub async fn status(&self) -> Option<ProcessHandle> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|worker| worker.status.borrow().clone())
    }

    async fn shutdown(&self, worker: MonitoredWorker) {
        let pid = worker.pid();
        let MonitoredWorker {
            stop_tx, monitor, ..
        } = worker;

        // The monitor may already have observed an exit
        let _ = stop_tx.send(());

        let bound = self.graceful_stop + self.kill_wait + MONITOR_JOIN_SLACK;
        let abort = monitor.abort_handle();
        match timeout(bound, monitor).await {
            Ok(Ok(())) => log::info!("Worker stopped: pid={pid}"),
            Ok(Err(e)) => log::warn!("Worker monitor failed: pid={pid}, error={e}"),
            Err(_) => {
                log::warn!("Worker monitor did not finish in {bound:?}, abandoning: pid={pid}");
                abort.abort();
            }
        }
    }

    fn process_name(&self) -> OsString {
        self.executable
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| self.executable.as_os_str().to_os_string())
    }
}

impl MonitoredWorker {
    fn pid(&self) -> u32 {
        self.status.borrow().pid
    }
}

/// Owns the child until it exits or a stop is requested.
async fn monitor(
    mut child: Child,
    status_tx: watch::Sender<ProcessHandle>,
    mut stop_rx: oneshot::Receiver<()>,
    graceful_stop: Duration,
    kill_wait: Duration,
) {
    let pid = status_tx.borrow().pid;

    let exit = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => {
                log::warn!(
                    "Worker exited unexpectedly: pid={pid}, exit_code={:?}",
                    status.code()
                );
                Some(status)
            }
            Err(e) => {
                log::warn!("Failed to wait for worker: pid={pid}, error={e}");
                None
            }
        },
        // Also taken when the supervisor is dropped
        _ = &mut stop_rx => terminate(&mut child, pid, graceful_stop, kill_wait).await,
    };

    status_tx.send_modify(|handle| {
        handle.exited = true;
        handle.exit_code = exit.and_then(|status| status.code());
    });
}

async fn terminate(
    child: &mut Child,
    pid: u32,
    graceful_stop: Duration,
    kill_wait: Duration,
) -> Option<ExitStatus> {
    if request_termination(pid).await {
        log::debug!("Sent termination request to worker: pid={pid}");
    }

    if let Ok(Ok(status)) = timeout(graceful_stop, child.wait()).await {
        return Some(status);
    }

    log::debug!("Worker still running after {graceful_stop:?}, killing: pid={pid}");
    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill worker: pid={pid}, error={e}");
    }

    match timeout(kill_wait, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            log::warn!("Failed to wait for killed worker: pid={pid}, error={e}");
            None
        }
        Err(_) => {
            log::warn!("Worker did not exit within {kill_wait:?} after kill: pid={pid}");
            None
        }
    }
}

/// Run a process table query on the blocking pool.
///
/// The `System` travels into the closure and back so its refresh state is
/// reused across calls. `None` when the task panicked.
async fn scan<T, F>(system: System, query: F) -> Option<(System, T)>
where
    T: Send + 'static,
    F: FnOnce(&mut System) -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let mut system = system;
        let result = query(&mut system);
        (system, result)
    });
    match task.await {
        Ok(scanned) => Some(scanned),
        Err(e) => {
            log::warn!("Process table scan failed: {e}");
            None
        }
    }
}

/// Send SIGTERM (or the platform equivalent) if supported.
async fn request_termination(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    scan(System::new(), move |system| {
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .and_then(|process| process.kill_with(Signal::Term))
            .unwrap_or(false)
    })
    .await
    .is_some_and(|(_, requested)| requested)
}

/// Terminate every live process named `name` except ourselves.
///
/// Survivors are force-killed once `grace` elapses; a zero grace kills
/// immediately. Returns the number of processes found.
async fn sweep_same_name(name: &OsStr, grace: Duration) -> usize {
    let own_pid = sysinfo::get_current_pid().ok();
    let target = name.to_os_string();
    let Some((mut system, pids)) = scan(System::new(), move |system| {
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes_by_exact_name(&target)
            .filter(|process| Some(process.pid()) != own_pid)
            .filter(|process| process.status() != ProcessStatus::Zombie)
            .map(|process| process.pid())
            .collect::<Vec<Pid>>()
    })
    .await
    else {
        return 0;
    };

    if pids.is_empty() {
        return 0;
    }

    log::warn!(
        "Found {} process(es) named {}: {:?}",
        pids.len(),
        name.to_string_lossy(),
        pids
    );

    if !grace.is_zero() {
        for pid in &pids {
            let requested = system
                .process(*pid)
                .and_then(|process| process.kill_with(Signal::Term))
                .unwrap_or(false);
            if !requested {
                log::debug!("Termination request not delivered: pid={pid}");
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            let watched = pids.clone();
            let Some((next, running)) =
                scan(system, move |system| still_running(system, &watched)).await
            else {
                return pids.len();
            };
            system = next;
            if running.is_empty() {
                return pids.len();
            }
            sleep(SWEEP_POLL_INTERVAL).await;
        }
    }

    let watched = pids.clone();
    if let Some((system, running)) =
        scan(system, move |system| still_running(system, &watched)).await
    {
        for pid in running {
            if let Some(process) = system.process(pid) {
                if !process.kill() {
                    log::warn!("Failed to kill process: pid={pid}");
                }
            }
        }
    }

    pids.len()
}

/// Refreshes `pids` and keeps those still alive. Blocking.
fn still_running(system: &mut System, pids: &[Pid]) -> Vec<Pid> {
    system.refresh_processes(ProcessesToUpdate::Some(pids), true);
    pids.iter()
        .copied()
        .filter(|pid| {
            system
                .process(*pid)
                .is_some_and(|process| process.status() != ProcessStatus::Zombie)
        })
        .collect()
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, level: log::Level) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::log!(target: "worker", level, "{line}"),
            Ok(None) => break,
            Err(e) => {
                log::debug!("Worker output stream closed with error: {e}");
                break;
            }
        }
    }
}

fn now_ms() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}
