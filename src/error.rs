use std::path::PathBuf;

/// Why the backend process never reached readiness on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchCause {
    /// The process could not be started at all.
    Spawn,
    /// The process started and then exited before answering its health check.
    EarlyExit,
}

/// Failures of the backend launch sequence.
///
/// Every variant is fatal while the sequence is running; after the backend is ready the
/// same values are only reported as degraded-mode notices.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No usable Java runtime was found ({checked} candidates checked).")]
    RuntimeNotFound { checked: usize },
    #[error("Backend artifact not found at {}.", .0.display())]
    ArtifactMissing(PathBuf),
    #[error("Backend process failed to launch: {detail}")]
    LaunchFailure { cause: LaunchCause, detail: String },
    #[error("Backend did not answer its health check after {attempts} attempts.")]
    ReadinessTimeout { attempts: u32 },
    #[error("{0}")]
    Unknown(String),
}
