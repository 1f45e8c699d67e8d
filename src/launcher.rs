use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::SupervisorError;
use crate::process_command::{hide_console_window, send_terminate_signal};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to start the backend. Built once the runtime is known and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    runtime_path: PathBuf,
    artifact_path: PathBuf,
    port: u16,
    extra_args: Vec<String>,
}

impl LaunchConfig {
    pub fn new(runtime_path: PathBuf, artifact_path: PathBuf, port: u16) -> Self {
        Self {
            runtime_path,
            artifact_path,
            port,
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn runtime_path(&self) -> &Path {
        &self.runtime_path
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "-jar".to_string(),
            self.artifact_path.display().to_string(),
            format!("--server.port={}", self.port),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

pub(crate) fn ensure_artifact(path: &Path) -> Result<(), SupervisorError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SupervisorError::ArtifactMissing(path.to_path_buf()))
    }
}

/// Process-level notifications posted by the launcher's observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    SpawnFailed(String),
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSeverity {
    Error,
    Warn,
    Info,
}

/// Presentation-only severity of a backend output line.
pub fn classify_line(line: &str) -> LineSeverity {
    let upper = line.to_uppercase();
    if upper.contains("ERROR") || upper.contains("FATAL") || line.contains("Exception") {
        LineSeverity::Error
    } else if upper.contains("WARN") {
        LineSeverity::Warn
    } else {
        LineSeverity::Info
    }
}

fn forward_line(stream: &'static str, line: &str) {
    match classify_line(line) {
        LineSeverity::Error => error!(target: "backend", stream, "{line}"),
        LineSeverity::Warn => warn!(target: "backend", stream, "{line}"),
        LineSeverity::Info => info!(target: "backend", stream, "{line}"),
    }
}

fn spawn_line_reader<R>(stream: &'static str, reader: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else {
                break;
            };
            if !line.trim().is_empty() {
                forward_line(stream, &line);
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Running,
    Exited(Option<i32>),
}

/// The operations the supervisor needs on a live child process.
pub trait ChildControl: Send {
    fn pid(&self) -> u32;
    fn status(&mut self) -> io::Result<ChildStatus>;
    /// Polite shutdown request.
    fn terminate(&mut self) -> Result<(), String>;
    /// Forced kill.
    fn kill(&mut self) -> io::Result<()>;
}

impl ChildControl for Child {
    fn pid(&self) -> u32 {
        self.id()
    }

    fn status(&mut self) -> io::Result<ChildStatus> {
        Ok(match self.try_wait()? {
            Some(status) => ChildStatus::Exited(status.code()),
            None => ChildStatus::Running,
        })
    }

    fn terminate(&mut self) -> Result<(), String> {
        send_terminate_signal(self.id())
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)?;
        self.wait().map(|_| ())
    }
}

type SharedChild = Arc<Mutex<Box<dyn ChildControl>>>;

fn lock_child(child: &SharedChild) -> MutexGuard<'_, Box<dyn ChildControl>> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ownership of the one backend process.
pub struct ProcessHandle {
    pid: u32,
    child: SharedChild,
    exit_code: Arc<OnceLock<Option<i32>>>,
    stop_observing: Arc<AtomicBool>,
    observers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Takes over `child` and starts the exit observer, which posts exactly one
    /// `ProcessEvent::Exited` when the process ends.
    pub fn attach(child: Box<dyn ChildControl>, events: Sender<ProcessEvent>) -> Self {
        let pid = child.pid();
        let child: SharedChild = Arc::new(Mutex::new(child));
        let exit_code = Arc::new(OnceLock::new());
        let stop_observing = Arc::new(AtomicBool::new(false));

        let observer = {
            let child = Arc::clone(&child);
            let exit_code = Arc::clone(&exit_code);
            let stop_observing = Arc::clone(&stop_observing);
            thread::spawn(move || loop {
                if stop_observing.load(Ordering::Relaxed) {
                    break;
                }

                let status = lock_child(&child).status();
                match status {
                    Ok(ChildStatus::Exited(code)) => {
                        let _ = exit_code.set(code);
                        info!(pid, ?code, "backend process exited");
                        let _ = events.send(ProcessEvent::Exited { code });
                        break;
                    }
                    Ok(ChildStatus::Running) => {}
                    Err(error) => {
                        warn!(pid, %error, "stopped observing backend process");
                        break;
                    }
                }

                thread::sleep(EXIT_POLL_INTERVAL);
            })
        };

        Self {
            pid,
            child,
            exit_code,
            stop_observing,
            observers: vec![observer],
        }
    }

    fn with_output_readers(mut self, readers: Vec<JoinHandle<()>>) -> Self {
        self.observers.extend(readers);
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.exit_code.get().copied()
    }

    pub fn is_alive(&self) -> bool {
        self.exit_code.get().is_none()
    }

    pub(crate) fn terminate(&self) -> Result<(), String> {
        lock_child(&self.child).terminate()
    }

    pub(crate) fn force_kill(&self) -> io::Result<()> {
        lock_child(&self.child).kill()
    }

    /// Polls the child until it exits or `timeout` elapses.
    pub(crate) fn wait_for_exit(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if !self.is_alive() {
                return true;
            }

            if let Ok(ChildStatus::Exited(code)) = lock_child(&self.child).status() {
                let _ = self.exit_code.set(code);
                return true;
            }

            if started.elapsed() >= timeout {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.stop_observing.store(true, Ordering::Relaxed);
        // Readers finish on EOF once the process is gone; never block shutdown on them.
        self.observers.clear();
    }
}

pub trait LaunchBackend {
    /// Starts the backend. Spawn errors are posted as `ProcessEvent::SpawnFailed` and
    /// yield `None`; they are never returned directly.
    fn launch(&self, config: &LaunchConfig, events: Sender<ProcessEvent>) -> Option<ProcessHandle>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JavaLauncher;

impl LaunchBackend for JavaLauncher {
    fn launch(&self, config: &LaunchConfig, events: Sender<ProcessEvent>) -> Option<ProcessHandle> {
        let mut command = Command::new(config.runtime_path());
        command
            .args(config.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console_window(&mut command);

        info!(
            runtime = %config.runtime_path().display(),
            artifact = %config.artifact_path().display(),
            port = config.port(),
            "starting backend"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let _ = events.send(ProcessEvent::SpawnFailed(format!(
                    "Failed to execute {}: {error}",
                    config.runtime_path().display()
                )));
                return None;
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader("stderr", stderr));
        }

        info!(pid = child.id(), "backend process spawned");
        Some(ProcessHandle::attach(Box::new(child), events).with_output_readers(readers))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Scripted child: stays alive until terminated or killed.
    pub(crate) struct FakeChild {
        pub(crate) pid: u32,
        pub(crate) exited: Arc<Mutex<Option<Option<i32>>>>,
        pub(crate) terminations: Arc<AtomicUsize>,
        pub(crate) kills: Arc<AtomicUsize>,
        pub(crate) ignores_terminate: bool,
    }

    impl FakeChild {
        pub(crate) fn new(pid: u32) -> Self {
            Self {
                pid,
                exited: Arc::new(Mutex::new(None)),
                terminations: Arc::new(AtomicUsize::new(0)),
                kills: Arc::new(AtomicUsize::new(0)),
                ignores_terminate: false,
            }
        }
    }

    impl ChildControl for FakeChild {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn status(&mut self) -> io::Result<ChildStatus> {
            Ok(match *self.exited.lock().unwrap() {
                Some(code) => ChildStatus::Exited(code),
                None => ChildStatus::Running,
            })
        }

        fn terminate(&mut self) -> Result<(), String> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            if !self.ignores_terminate {
                *self.exited.lock().unwrap() = Some(Some(143));
            }
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            *self.exited.lock().unwrap() = Some(None);
            Ok(())
        }
    }
}
