use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticReporter, ErrorReport};
use crate::error::{LaunchCause, SupervisorError};
use crate::launcher::{ensure_artifact, LaunchBackend, LaunchConfig, ProcessEvent, ProcessHandle};
use crate::readiness::{HealthCheck, PortListenerCheck, ProbeOutcome, ProbePolicy, ReadinessProber};
use crate::runtime_locator::LocateRuntime;

pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorPhase {
    Idle,
    Discovering,
    Launching,
    Probing,
    Ready,
    Failed,
    Stopped,
}

impl SupervisorPhase {
    pub fn can_transition_to(self, next: SupervisorPhase) -> bool {
        use SupervisorPhase::*;

        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, Discovering) | (Idle, Ready) => true,
            (Discovering, Launching) | (Launching, Probing) | (Probing, Ready) => true,
            (Discovering | Launching | Probing, Failed) => true,
            _ => false,
        }
    }
}

/// The collaborators one launch sequence runs through.
pub struct LaunchStages<'a> {
    pub listener_check: &'a dyn PortListenerCheck,
    pub locator: &'a dyn LocateRuntime,
    pub launcher: &'a dyn LaunchBackend,
    pub health: &'a dyn HealthCheck,
    pub policy: ProbePolicy,
    pub artifact_path: PathBuf,
    pub port: u16,
    pub extra_args: Vec<String>,
}

#[derive(Debug)]
pub struct ReadyBackend {
    pub attempts: u32,
    /// Set when an existing listener on the port was trusted instead of launching.
    pub reused_listener: bool,
    pub events: Option<Receiver<ProcessEvent>>,
}

#[derive(Debug)]
pub enum SequenceOutcome {
    Ready(ReadyBackend),
    Failed(ErrorReport),
    Stopped,
    AlreadyStarted,
}

enum StageError {
    Stopped,
    Failed(SupervisorError),
}

impl From<SupervisorError> for StageError {
    fn from(error: SupervisorError) -> Self {
        Self::Failed(error)
    }
}

struct SupervisorInner {
    phase: SupervisorPhase,
    handle: Option<ProcessHandle>,
    started: bool,
}

/// Owns the backend process and the phase of its launch sequence.
pub struct Supervisor {
    inner: Mutex<SupervisorInner>,
    reporter: DiagnosticReporter,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(reporter: DiagnosticReporter) -> Self {
        Self {
            inner: Mutex::new(SupervisorInner {
                phase: SupervisorPhase::Idle,
                handle: None,
                started: false,
            }),
            reporter,
            stop_grace: STOP_GRACE_PERIOD,
        }
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.lock().phase
    }

    pub fn has_live_process(&self) -> bool {
        self.lock()
            .handle
            .as_ref()
            .is_some_and(ProcessHandle::is_alive)
    }

    fn claim_sequence(&self) -> bool {
        let mut inner = self.lock();
        if inner.started || inner.phase != SupervisorPhase::Idle {
            return false;
        }
        inner.started = true;
        true
    }

    fn transition(&self, next: SupervisorPhase) -> Result<(), StageError> {
        let mut inner = self.lock();
        if inner.phase == SupervisorPhase::Stopped {
            return Err(StageError::Stopped);
        }
        if !inner.phase.can_transition_to(next) {
            return Err(StageError::Failed(SupervisorError::Unknown(format!(
                "Invalid supervisor transition {:?} -> {next:?}",
                inner.phase
            ))));
        }

        debug!(from = ?inner.phase, to = ?next, "supervisor phase change");
        inner.phase = next;
        Ok(())
    }

    /// Runs Locate → Launch → Probe once. Later calls return `AlreadyStarted`.
    pub fn run_launch_sequence(&self, stages: LaunchStages<'_>) -> SequenceOutcome {
        if !self.claim_sequence() {
            debug!("launch sequence already started; ignoring trigger");
            return SequenceOutcome::AlreadyStarted;
        }

        match self.drive(&stages) {
            Ok(ready) => {
                info!(
                    attempts = ready.attempts,
                    reused_listener = ready.reused_listener,
                    "backend ready"
                );
                SequenceOutcome::Ready(ready)
            }
            Err(StageError::Stopped) => {
                info!("launch sequence ended by stop request");
                SequenceOutcome::Stopped
            }
            Err(StageError::Failed(error)) => self.fail(error),
        }
    }

    /// Fails a sequence that could not even be assembled.
    pub fn abort_startup(&self, error: SupervisorError) -> SequenceOutcome {
        if !self.claim_sequence() {
            return SequenceOutcome::AlreadyStarted;
        }
        if let Err(StageError::Stopped) = self.transition(SupervisorPhase::Discovering) {
            return SequenceOutcome::Stopped;
        }
        self.fail(error)
    }

    fn drive(&self, stages: &LaunchStages<'_>) -> Result<ReadyBackend, StageError> {
        if stages.listener_check.has_listener(stages.port) {
            // Trusted without checking what is listening.
            warn!(port = stages.port, "port already in use; assuming a running backend");
            self.transition(SupervisorPhase::Ready)?;
            return Ok(ReadyBackend {
                attempts: 0,
                reused_listener: true,
                events: None,
            });
        }

        self.transition(SupervisorPhase::Discovering)?;
        let runtime = stages.locator.locate()?;
        ensure_artifact(&stages.artifact_path)?;

        self.transition(SupervisorPhase::Launching)?;
        let config = LaunchConfig::new(runtime.path, stages.artifact_path.clone(), stages.port)
            .with_extra_args(stages.extra_args.clone());
        let (events_tx, events) = mpsc::channel();
        let Some(handle) = stages.launcher.launch(&config, events_tx) else {
            let detail = match events.try_recv() {
                Ok(ProcessEvent::SpawnFailed(detail)) => detail,
                _ => "Backend process could not be started.".to_string(),
            };
            return Err(SupervisorError::LaunchFailure {
                cause: LaunchCause::Spawn,
                detail,
            }
            .into());
        };
        self.adopt(handle)?;

        let mut early_exit = None;
        let prober = ReadinessProber::new(stages.health, stages.policy);
        let outcome = prober.wait_until_ready(|| {
            if self.phase() == SupervisorPhase::Stopped {
                return true;
            }
            match events.try_recv() {
                Ok(event) => {
                    early_exit = Some(describe_early_exit(&event));
                    true
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
            }
        })?;

        match outcome {
            ProbeOutcome::Ready { attempts } => {
                self.transition(SupervisorPhase::Ready)?;
                Ok(ReadyBackend {
                    attempts,
                    reused_listener: false,
                    events: Some(events),
                })
            }
            ProbeOutcome::Interrupted { .. } => match early_exit {
                Some(error) if self.phase() != SupervisorPhase::Stopped => Err(error.into()),
                _ => Err(StageError::Stopped),
            },
        }
    }

    fn adopt(&self, handle: ProcessHandle) -> Result<(), StageError> {
        let mut inner = self.lock();
        if inner.phase == SupervisorPhase::Stopped {
            drop(inner);
            info!(pid = handle.pid(), "stop requested during launch; terminating new backend");
            self.terminate(handle);
            return Err(StageError::Stopped);
        }
        if inner.handle.as_ref().is_some_and(ProcessHandle::is_alive) {
            drop(inner);
            self.terminate(handle);
            return Err(StageError::Failed(SupervisorError::Unknown(
                "A backend process is already running.".to_string(),
            )));
        }

        inner.handle = Some(handle);
        drop(inner);
        self.transition(SupervisorPhase::Probing)
    }

    fn fail(&self, error: SupervisorError) -> SequenceOutcome {
        let handle = {
            let mut inner = self.lock();
            if inner.phase == SupervisorPhase::Stopped {
                return SequenceOutcome::Stopped;
            }
            inner.phase = SupervisorPhase::Failed;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            self.terminate(handle);
        }

        let report = self
            .reporter
            .report_fatal(&error)
            .unwrap_or_else(|| ErrorReport::from_error(&error, self.reporter.backend_port()));
        SequenceOutcome::Failed(report)
    }

    /// Moves to `Stopped` and shuts the backend down. Returns `false` when already stopped.
    pub fn stop(&self) -> bool {
        let handle = {
            let mut inner = self.lock();
            if inner.phase == SupervisorPhase::Stopped {
                return false;
            }
            debug!(from = ?inner.phase, "supervisor stopping");
            inner.phase = SupervisorPhase::Stopped;
            inner.handle.take()
        };

        if let Some(handle) = handle {
            self.terminate(handle);
        }
        true
    }

    fn terminate(&self, handle: ProcessHandle) {
        if !handle.is_alive() {
            return;
        }

        let pid = handle.pid();
        info!(pid, "stopping backend process");
        if let Err(error) = handle.terminate() {
            warn!(pid, %error, "graceful termination failed");
        }
        if handle.wait_for_exit(self.stop_grace) {
            return;
        }

        warn!(pid, grace_ms = self.stop_grace.as_millis() as u64, "backend ignored termination; killing");
        if let Err(error) = handle.force_kill() {
            warn!(pid, %error, "failed to kill backend process");
        }
    }

    /// Follows the backend after `Ready` and reports crashes without exiting.
    pub fn watch(&self, events: Receiver<ProcessEvent>) {
        while let Ok(event) = events.recv() {
            if self.phase() == SupervisorPhase::Stopped {
                break;
            }
            if let ProcessEvent::Exited { code } = event {
                self.reporter.report_degraded(format!(
                    "The backend service stopped unexpectedly (exit code {}).",
                    describe_code(code)
                ));
                break;
            }
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    code.map(|code| code.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn describe_early_exit(event: &ProcessEvent) -> SupervisorError {
    match event {
        ProcessEvent::SpawnFailed(detail) => SupervisorError::LaunchFailure {
            cause: LaunchCause::Spawn,
            detail: detail.clone(),
        },
        ProcessEvent::Exited { code } => SupervisorError::LaunchFailure {
            cause: LaunchCause::EarlyExit,
            detail: format!(
                "Backend exited with code {} before becoming ready.",
                describe_code(*code)
            ),
        },
    }
}
