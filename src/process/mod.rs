//! Async child-process supervision
//!
//! Launches child processes (MCP servers and helpers) with piped output,
//! streams stdout/stderr into bounded ring buffers, fires output and
//! termination callbacks, and enforces graceful-then-forced termination.
//! On POSIX every child gets its own process group so a force kill takes
//! the whole group down.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Which output stream a line arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Callback for process output: (process name, stream, line)
pub type OutputCallback = Arc<dyn Fn(&str, StreamKind, &str) + Send + Sync>;

/// Callback for process termination: (process name, return code)
pub type TerminationCallback = Arc<dyn Fn(&str, Option<i32>) + Send + Sync>;

/// Statistics snapshot for a supervised process
#[derive(Debug, Clone)]
pub struct ProcessStats {
    pub name: String,
    pub pid: u32,
    pub command: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub is_running: bool,
    pub return_code: Option<i32>,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

struct ProcState {
    return_code: Option<i32>,
    terminated: bool,
}

/// A supervised process and its captured output
pub struct ProcessInfo {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub pid: u32,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    stdout: Mutex<VecDeque<String>>,
    stderr: Mutex<VecDeque<String>>,
    state: Mutex<ProcState>,
    exited: watch::Receiver<bool>,
}

impl ProcessInfo {
    /// Running iff no return code has been recorded and the process was
    /// not terminated.
    pub fn is_running(&self) -> bool {
        let state = lock_unpoisoned(&self.state);
        state.return_code.is_none() && !state.terminated
    }

    pub fn return_code(&self) -> Option<i32> {
        lock_unpoisoned(&self.state).return_code
    }

    pub fn uptime(&self) -> Duration {
        self.started_instant.elapsed()
    }

    /// Most recent output lines from one or both streams
    pub fn output(&self, stream: Option<StreamKind>, lines: usize) -> Vec<String> {
        let take = |buffer: &Mutex<VecDeque<String>>| -> Vec<String> {
            let buffer = lock_unpoisoned(buffer);
            buffer
                .iter()
                .skip(buffer.len().saturating_sub(lines))
                .cloned()
                .collect()
        };

        match stream {
            Some(StreamKind::Stdout) => take(&self.stdout),
            Some(StreamKind::Stderr) => take(&self.stderr),
            None => {
                let mut combined = take(&self.stdout);
                combined.extend(take(&self.stderr));
                let skip = combined.len().saturating_sub(lines);
                combined.into_iter().skip(skip).collect()
            }
        }
    }

    pub fn stats(&self) -> ProcessStats {
        let state = lock_unpoisoned(&self.state);
        ProcessStats {
            name: self.name.clone(),
            pid: self.pid,
            command: self.command.clone(),
            args: self.args.clone(),
            started_at: self.started_at,
            uptime: self.started_instant.elapsed(),
            is_running: state.return_code.is_none() && !state.terminated,
            return_code: state.return_code,
            stdout_lines: lock_unpoisoned(&self.stdout).len(),
            stderr_lines: lock_unpoisoned(&self.stderr).len(),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct MonitorShared {
    processes: Mutex<HashMap<String, Arc<ProcessInfo>>>,
    monitors: Mutex<HashMap<String, JoinHandle<()>>>,
    output_callbacks: Mutex<Vec<OutputCallback>>,
    termination_callbacks: Mutex<Vec<TerminationCallback>>,
    max_buffer_lines: usize,
    shutdown: AtomicBool,
}

/// Supervisor for child processes with bounded output capture
#[derive(Clone)]
pub struct ProcessMonitor {
    shared: Arc<MonitorShared>,
}

impl ProcessMonitor {
    pub fn new(max_buffer_lines: usize) -> Self {
        ProcessMonitor {
            shared: Arc::new(MonitorShared {
                processes: Mutex::new(HashMap::new()),
                monitors: Mutex::new(HashMap::new()),
                output_callbacks: Mutex::new(Vec::new()),
                termination_callbacks: Mutex::new(Vec::new()),
                max_buffer_lines,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Register a callback fired for every captured output line
    pub fn add_output_callback(&self, callback: OutputCallback) {
        lock_unpoisoned(&self.shared.output_callbacks).push(callback);
    }

    /// Register a callback fired when a process terminates
    pub fn add_termination_callback(&self, callback: TerminationCallback) {
        lock_unpoisoned(&self.shared.termination_callbacks).push(callback);
    }

    /// Start a process and begin supervising it. Starting an
    /// already-running name returns the existing process; a stopped one is
    /// cleaned up first.
    pub async fn start(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&str>,
    ) -> Result<Arc<ProcessInfo>> {
        if let Some(existing) = self.get(name) {
            if existing.is_running() {
                warn!("Process '{}' is already running", name);
                return Ok(existing);
            }
            self.stop(name, Duration::from_secs(1)).await?;
        }

        info!("Starting process '{}': {} {:?}", name, command, args);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = env {
            cmd.envs(env);
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start '{}': {}", name, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Process(format!("Process '{}' exited before start", name)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Process("Failed to capture stderr".to_string()))?;

        let (exit_tx, exit_rx) = watch::channel(false);
        let entry = Arc::new(ProcessInfo {
            name: name.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            pid,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            stdout: Mutex::new(VecDeque::new()),
            stderr: Mutex::new(VecDeque::new()),
            state: Mutex::new(ProcState {
                return_code: None,
                terminated: false,
            }),
            exited: exit_rx,
        });

        lock_unpoisoned(&self.shared.processes).insert(name.to_string(), entry.clone());

        let shared = self.shared.clone();
        let monitor_entry = entry.clone();
        let monitor_name = name.to_string();
        let monitor = tokio::spawn(async move {
            let stdout_task = tokio::spawn(read_stream(
                shared.clone(),
                monitor_entry.clone(),
                stdout,
                StreamKind::Stdout,
            ));
            let stderr_task = tokio::spawn(read_stream(
                shared.clone(),
                monitor_entry.clone(),
                stderr,
                StreamKind::Stderr,
            ));

            let status = child.wait().await;
            let code = status.ok().and_then(|s| s.code());

            // Record the code first so the stream readers notice the exit
            // on their next poll even if a grandchild holds the pipe open
            {
                let mut state = lock_unpoisoned(&monitor_entry.state);
                state.return_code = code;
            }

            let _ = stdout_task.await;
            let _ = stderr_task.await;

            {
                let mut state = lock_unpoisoned(&monitor_entry.state);
                state.terminated = true;
            }
            let _ = exit_tx.send(true);

            info!("Process '{}' terminated with code {:?}", monitor_name, code);

            let callbacks: Vec<TerminationCallback> =
                lock_unpoisoned(&shared.termination_callbacks).clone();
            for callback in callbacks {
                callback(&monitor_name, code);
            }

            lock_unpoisoned(&shared.monitors).remove(&monitor_name);
        });
        lock_unpoisoned(&self.shared.monitors).insert(name.to_string(), monitor);

        // Give very short-lived processes a moment; a clean fast exit is
        // fine, a failed one is a start error.
        tokio::time::sleep(Duration::from_millis(10)).await;
        match entry.return_code() {
            Some(0) => {
                info!("Process '{}' completed immediately with exit code 0", name);
                Ok(entry)
            }
            Some(code) => {
                lock_unpoisoned(&self.shared.processes).remove(name);
                Err(Error::Process(format!(
                    "Process '{}' failed with exit code {}",
                    name, code
                )))
            }
            None => {
                info!("Process '{}' started (PID: {})", name, pid);
                Ok(entry)
            }
        }
    }

    /// Stop a process: graceful termination, then a group force-kill after
    /// `timeout`, then removal from the registry.
    pub async fn stop(&self, name: &str, timeout: Duration) -> Result<bool> {
        let Some(entry) = self.get(name) else {
            return Ok(true);
        };

        if entry.is_running() {
            info!("Stopping process '{}' (PID: {})", name, entry.pid);
            if let Err(e) = signal_terminate(entry.pid) {
                // Lost the race with a natural exit
                debug!("Termination signal for '{}' failed: {}", name, e);
            }

            let mut exited = entry.exited.clone();
            if tokio::time::timeout(timeout, wait_exited(&mut exited))
                .await
                .is_err()
            {
                warn!("Process '{}' did not terminate, forcing kill", name);
                signal_kill_group(entry.pid);
                let _ = tokio::time::timeout(Duration::from_secs(5), wait_exited(&mut exited)).await;
            }
        }

        {
            let mut state = lock_unpoisoned(&entry.state);
            state.terminated = true;
        }

        if let Some(handle) = lock_unpoisoned(&self.shared.monitors).remove(name) {
            handle.abort();
        }
        lock_unpoisoned(&self.shared.processes).remove(name);
        Ok(true)
    }

    /// Stop every supervised process concurrently
    pub async fn stop_all(&self, timeout: Duration) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let names: Vec<String> = lock_unpoisoned(&self.shared.processes)
            .keys()
            .cloned()
            .collect();

        let stops = names.iter().map(|name| self.stop(name, timeout));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                error!("Error stopping process: {}", e);
            }
        }
    }

    /// Wait for a process to exit, returning its code
    pub async fn wait_for_exit(&self, name: &str, timeout: Duration) -> Result<Option<i32>> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::Process(format!("Unknown process: {}", name)))?;
        let mut exited = entry.exited.clone();
        tokio::time::timeout(timeout, wait_exited(&mut exited))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("wait_for_exit[{}]", name),
                budget_secs: timeout.as_secs(),
            })?;
        Ok(entry.return_code())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessInfo>> {
        lock_unpoisoned(&self.shared.processes).get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<ProcessInfo>> {
        lock_unpoisoned(&self.shared.processes)
            .values()
            .cloned()
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.get(name).is_some_and(|entry| entry.is_running())
    }

    /// Stats for one process
    pub fn stats(&self, name: &str) -> Option<ProcessStats> {
        self.get(name).map(|entry| entry.stats())
    }

    /// Stats for every supervised process
    pub fn all_stats(&self) -> HashMap<String, ProcessStats> {
        self.all()
            .into_iter()
            .map(|entry| (entry.name.clone(), entry.stats()))
            .collect()
    }
}

/// Wait until the exit flag flips
async fn wait_exited(exited: &mut watch::Receiver<bool>) {
    while !*exited.borrow() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

/// Read a stream line-by-line into the entry's ring buffer, firing output
/// callbacks. The short read timeout keeps the task cancellable and lets
/// it notice process exit promptly.
async fn read_stream<R: AsyncRead + Unpin>(
    shared: Arc<MonitorShared>,
    entry: Arc<ProcessInfo>,
    stream: R,
    kind: StreamKind,
) {
    let mut reader = BufReader::new(stream);
    let mut buf: Vec<u8> = Vec::new();

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        match tokio::time::timeout(Duration::from_millis(500), reader.read_until(b'\n', &mut buf))
            .await
        {
            // Timed out; partial data stays in buf for the next read
            Err(_) => {
                if !entry.is_running() {
                    break;
                }
                continue;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                if !buf.ends_with(b"\n") {
                    // Partial line at EOF boundary; keep accumulating
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                buf.clear();

                {
                    let buffer = match kind {
                        StreamKind::Stdout => &entry.stdout,
                        StreamKind::Stderr => &entry.stderr,
                    };
                    let mut buffer = lock_unpoisoned(buffer);
                    buffer.push_back(line.clone());
                    while buffer.len() > shared.max_buffer_lines {
                        buffer.pop_front();
                    }
                }

                match kind {
                    StreamKind::Stdout => debug!("[{}:stdout] {}", entry.name, line),
                    StreamKind::Stderr => info!("[{}:stderr] {}", entry.name, line),
                }

                let callbacks: Vec<OutputCallback> =
                    lock_unpoisoned(&shared.output_callbacks).clone();
                for callback in callbacks {
                    callback(&entry.name, kind, &line);
                }
            }
            Ok(Err(e)) => {
                error!("Error reading {} for '{}': {}", kind, entry.name, e);
                break;
            }
        }
    }

    // Flush a trailing line without a newline
    if !buf.is_empty() {
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        if !line.is_empty() {
            let buffer = match kind {
                StreamKind::Stdout => &entry.stdout,
                StreamKind::Stderr => &entry.stderr,
            };
            let mut buffer = lock_unpoisoned(buffer);
            buffer.push_back(line.clone());
            while buffer.len() > shared.max_buffer_lines {
                buffer.pop_front();
            }
            drop(buffer);
            let callbacks: Vec<OutputCallback> = lock_unpoisoned(&shared.output_callbacks).clone();
            for callback in callbacks {
                callback(&entry.name, kind, &line);
            }
        }
    }
}

/// Graceful termination signal
#[cfg(unix)]
fn signal_terminate(pid: u32) -> Result<()> {
    // The child is its own process group leader
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        return Err(Error::Process(format!(
            "Failed to send SIGTERM to pid {}",
            pid
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> Result<()> {
    Err(Error::Process(
        "Graceful termination is only supported on POSIX platforms".to_string(),
    ))
}

/// Force-kill the whole process group
#[cfg(unix)]
fn signal_kill_group(pid: u32) {
    unsafe {
        if libc::killpg(pid as libc::pid_t, libc::SIGKILL) != 0 {
            let _ = libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn signal_kill_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let monitor = ProcessMonitor::new(100);

        let lines: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let lines_cb = lines.clone();
        monitor.add_output_callback(Arc::new(move |name, kind, line| {
            lines_cb
                .lock()
                .unwrap()
                .push((format!("{name}:{kind}"), line.to_string()));
        }));

        monitor
            .start("echoer", "sh", &sh("echo hello; echo oops >&2"), None, None)
            .await
            .unwrap();
        let code = monitor
            .wait_for_exit("echoer", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, Some(0));

        // Readers may finish just after the exit flag flips
        tokio::time::sleep(Duration::from_millis(100)).await;

        let entry = monitor.get("echoer").unwrap();
        assert_eq!(entry.output(Some(StreamKind::Stdout), 10), vec!["hello"]);
        assert_eq!(entry.output(Some(StreamKind::Stderr), 10), vec!["oops"]);
        assert!(!entry.is_running());

        let captured = lines.lock().unwrap();
        assert!(captured.contains(&("echoer:stdout".to_string(), "hello".to_string())));
        assert!(captured.contains(&("echoer:stderr".to_string(), "oops".to_string())));
    }

    #[tokio::test]
    async fn test_ring_buffer_is_bounded() {
        let monitor = ProcessMonitor::new(5);
        monitor
            .start(
                "chatty",
                "sh",
                &sh("i=1; while [ $i -le 20 ]; do echo line$i; i=$((i+1)); done"),
                None,
                None,
            )
            .await
            .unwrap();
        monitor
            .wait_for_exit("chatty", Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let entry = monitor.get("chatty").unwrap();
        let lines = entry.output(Some(StreamKind::Stdout), 100);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.last().map(String::as_str), Some("line20"));
    }

    #[tokio::test]
    async fn test_stop_terminates_gracefully() {
        let monitor = ProcessMonitor::new(100);
        monitor
            .start("sleeper", "sleep", &["30".to_string()], None, None)
            .await
            .unwrap();
        assert!(monitor.is_running("sleeper"));

        let start = std::time::Instant::now();
        monitor
            .stop("sleeper", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(monitor.get("sleeper").is_none());
    }

    #[tokio::test]
    async fn test_stop_force_kills_stubborn_process() {
        let monitor = ProcessMonitor::new(100);
        monitor
            .start(
                "stubborn",
                "sh",
                &sh("trap '' TERM; sleep 30"),
                None,
                None,
            )
            .await
            .unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = std::time::Instant::now();
        monitor
            .stop("stubborn", Duration::from_millis(300))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(monitor.get("stubborn").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_start_returns_existing() {
        let monitor = ProcessMonitor::new(100);
        let first = monitor
            .start("dup", "sleep", &["30".to_string()], None, None)
            .await
            .unwrap();
        let second = monitor
            .start("dup", "sleep", &["30".to_string()], None, None)
            .await
            .unwrap();
        assert_eq!(first.pid, second.pid);

        monitor.stop("dup", Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_termination_callback_fires() {
        let monitor = ProcessMonitor::new(100);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = fired.clone();
        monitor.add_termination_callback(Arc::new(move |name, code| {
            assert_eq!(name, "quick");
            assert_eq!(code, Some(3));
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }));

        monitor
            .start("quick", "sh", &sh("sleep 0.1; exit 3"), None, None)
            .await
            .unwrap();
        let code = monitor
            .wait_for_exit("quick", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, Some(3));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_failure_is_a_start_error() {
        let monitor = ProcessMonitor::new(100);
        let err = monitor
            .start("failer", "sh", &sh("exit 7"), None, None)
            .await;
        // Either the 10ms grace window caught the failure, or the process
        // is already gone by the first status check
        if let Ok(entry) = err {
            monitor
                .wait_for_exit("failer", Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(entry.return_code(), Some(7));
        }
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let monitor = ProcessMonitor::new(100);
        monitor
            .start("statted", "sleep", &["30".to_string()], None, None)
            .await
            .unwrap();

        let stats = monitor.stats("statted").unwrap();
        assert!(stats.pid > 0);
        assert!(stats.is_running);
        assert_eq!(stats.command, "sleep");
        assert_eq!(stats.return_code, None);
        assert_eq!(monitor.all_stats().len(), 1);

        monitor.stop_all(Duration::from_secs(2)).await;
        assert!(monitor.all().is_empty());
    }
}
