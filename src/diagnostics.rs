use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, warn};

use crate::error::{LaunchCause, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    RuntimeNotFound,
    ArtifactMissing,
    /// Health budget exhausted, port conflicts, and exits before readiness.
    ReadinessTimeout,
    Unknown,
}

impl ReportKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::RuntimeNotFound => "Java Runtime Not Found",
            Self::ArtifactMissing => "Backend Files Missing",
            Self::ReadinessTimeout => "Backend Service Did Not Start",
            Self::Unknown => "Smart Disk Analyzer Failed to Start",
        }
    }

    pub fn remediation(self, port: u16) -> String {
        match self {
            Self::RuntimeNotFound => "Install Java 17 or newer (for example Eclipse Temurin from \
                https://adoptium.net), or set JAVA_HOME to an existing installation, then start \
                Smart Disk Analyzer again."
                .to_string(),
            Self::ArtifactMissing => "The application installation is incomplete. Reinstall \
                Smart Disk Analyzer to restore the backend service files."
                .to_string(),
            Self::ReadinessTimeout => format!(
                "Make sure no other program is using port {port}, allow Smart Disk Analyzer \
                 through your firewall, and check whether antivirus software is blocking the \
                 bundled Java runtime. Then restart the application."
            ),
            Self::Unknown => "Restart the application. If the problem persists, reinstall it \
                and include the startup.log file from the application log folder when \
                reporting the issue."
                .to_string(),
        }
    }
}

/// Maps a launch-sequence failure onto one of the four report kinds.
pub fn classify(error: &SupervisorError) -> ReportKind {
    match error {
        SupervisorError::RuntimeNotFound { .. } => ReportKind::RuntimeNotFound,
        SupervisorError::ArtifactMissing(_) => ReportKind::ArtifactMissing,
        SupervisorError::ReadinessTimeout { .. } => ReportKind::ReadinessTimeout,
        SupervisorError::LaunchFailure { cause, .. } => match cause {
            LaunchCause::Spawn => ReportKind::Unknown,
            LaunchCause::EarlyExit => ReportKind::ReadinessTimeout,
        },
        SupervisorError::Unknown(_) => ReportKind::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ReportKind,
    pub title: String,
    pub detail: String,
    pub remediation: String,
    pub occurred_at: String,
}

impl ErrorReport {
    pub fn new(kind: ReportKind, detail: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            detail: detail.into(),
            remediation: kind.remediation(port),
            occurred_at: now_iso(),
        }
    }

    pub fn from_error(error: &SupervisorError, port: u16) -> Self {
        Self::new(classify(error), error.to_string(), port)
    }

    /// Text for a native modal: detail first, remediation after a blank line.
    pub fn dialog_body(&self) -> String {
        format!("{}\n\n{}", self.detail, self.remediation)
    }
}

/// Where reports end up. The shell shows a native modal and exits on fatal reports.
pub trait DiagnosticPresenter: Send + Sync {
    fn present_fatal(&self, report: &ErrorReport);

    fn notify_degraded(&self, _report: &ErrorReport) {}
}

pub struct DiagnosticReporter {
    presenter: Box<dyn DiagnosticPresenter>,
    reported: AtomicBool,
    backend_port: u16,
}

impl DiagnosticReporter {
    pub fn new(presenter: Box<dyn DiagnosticPresenter>, backend_port: u16) -> Self {
        Self {
            presenter,
            reported: AtomicBool::new(false),
            backend_port,
        }
    }

    /// Presents the first fatal error only; later ones are logged and dropped.
    pub fn report_fatal(&self, failure: &SupervisorError) -> Option<ErrorReport> {
        if self.reported.swap(true, Ordering::SeqCst) {
            warn!(%failure, "dropping additional startup failure; already reported");
            return None;
        }

        let report = ErrorReport::from_error(failure, self.backend_port);
        error!(kind = ?report.kind, detail = %report.detail, "backend startup failed");
        self.presenter.present_fatal(&report);
        Some(report)
    }

    pub fn report_degraded(&self, detail: impl Into<String>) -> ErrorReport {
        let report = ErrorReport::new(ReportKind::Unknown, detail, self.backend_port);
        warn!(detail = %report.detail, "backend running in degraded mode");
        self.presenter.notify_degraded(&report);
        report
    }

    pub fn backend_port(&self) -> u16 {
        self.backend_port
    }

    pub fn has_reported(&self) -> bool {
        self.reported.load(Ordering::SeqCst)
    }
}

pub(crate) fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
