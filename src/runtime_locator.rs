use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::SupervisorError;
use crate::process_command::run_command_with_timeout;

pub(crate) const JAVA_EXECUTABLE: &str = if cfg!(target_os = "windows") {
    "java.exe"
} else {
    "java"
};
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateOrigin {
    Bundled,
    Environment,
    WellKnown,
    SearchPath,
}

impl CandidateOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::Environment => "env",
            Self::WellKnown => "well-known",
            Self::SearchPath => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCandidate {
    pub path: PathBuf,
    pub origin: CandidateOrigin,
}

impl RuntimeCandidate {
    fn new(path: PathBuf, origin: CandidateOrigin) -> Self {
        Self { path, origin }
    }

    /// A bare command name is looked up on the search path instead of the filesystem.
    fn is_bare_command(&self) -> bool {
        !self.path.is_absolute() && self.path.components().count() == 1
    }
}

/// Inputs the candidate list is built from. Nothing here is cached between runs.
#[derive(Debug, Clone, Default)]
pub struct CandidateSources {
    pub resource_dir: Option<PathBuf>,
    pub include_bundled: bool,
    pub runtime_home: Option<PathBuf>,
    pub well_known_roots: Vec<PathBuf>,
}

pub fn default_well_known_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    #[cfg(target_os = "windows")]
    {
        for base in ["C:\\Program Files", "C:\\Program Files (x86)"] {
            let base = PathBuf::from(base);
            roots.push(base.join("Java"));
            roots.push(base.join("Eclipse Adoptium"));
            roots.push(base.join("Microsoft"));
        }
    }
    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/Library/Java/JavaVirtualMachines"));
        roots.push(PathBuf::from("/opt/homebrew/opt"));
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        roots.push(PathBuf::from("/usr/lib/jvm"));
        roots.push(PathBuf::from("/usr/java"));
        roots.push(PathBuf::from("/opt/java"));
    }

    roots
}

fn java_in_home(home: &Path) -> PathBuf {
    home.join("bin").join(JAVA_EXECUTABLE)
}

/// Major Java version in a JDK directory name: `jdk-17.0.2` is 17, `jdk1.8.0_292` and
/// `java-1.8.0-openjdk` are 8.
fn runtime_major_version(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let mut parts = name[start..].split(|c: char| !c.is_ascii_digit());
    let first: u32 = parts.next()?.parse().ok()?;
    if first != 1 {
        return Some(first);
    }
    match parts.next().and_then(|part| part.parse().ok()) {
        Some(legacy) if name[start..].starts_with("1.") => Some(legacy),
        _ => Some(first),
    }
}

/// JDK directories one level below `root`, newest major version first. Names without a
/// version come last. macOS bundles keep the actual home under `Contents/Home`.
fn installed_runtime_homes(root: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| {
            let version = runtime_major_version(&entry.file_name().to_string_lossy());
            (version, entry)
        })
        .collect();
    entries.sort_by(|(left_version, left), (right_version, right)| {
        right_version
            .cmp(left_version)
            .then_with(|| right.file_name().cmp(left.file_name()))
    });

    entries
        .into_iter()
        .map(|(_, entry)| {
            let macos_home = entry.path().join("Contents").join("Home");
            if macos_home.is_dir() {
                macos_home
            } else {
                entry.into_path()
            }
        })
        .collect()
}

/// Ordered candidate list: bundled JRE, `JAVA_HOME`, well-known installs, then `java`
/// on the search path.
pub fn build_candidates(sources: &CandidateSources) -> Vec<RuntimeCandidate> {
    let mut candidates = Vec::new();

    if sources.include_bundled {
        if let Some(resource_dir) = &sources.resource_dir {
            candidates.push(RuntimeCandidate::new(
                java_in_home(&resource_dir.join("jre")),
                CandidateOrigin::Bundled,
            ));
        }
    }

    if let Some(home) = &sources.runtime_home {
        candidates.push(RuntimeCandidate::new(
            java_in_home(home),
            CandidateOrigin::Environment,
        ));
    }

    for root in &sources.well_known_roots {
        for home in installed_runtime_homes(root) {
            candidates.push(RuntimeCandidate::new(
                java_in_home(&home),
                CandidateOrigin::WellKnown,
            ));
        }
    }

    candidates.push(RuntimeCandidate::new(
        PathBuf::from(JAVA_EXECUTABLE),
        CandidateOrigin::SearchPath,
    ));

    candidates
}

pub(crate) fn is_attempt_ready_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = std::fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }

        false
    }

    #[cfg(not(unix))]
    {
        true
    }
}

pub(crate) fn find_on_search_path(name: &Path, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_attempt_ready_executable(candidate))
}

/// Decides whether a resolved runtime actually runs.
pub trait VersionProbe {
    fn succeeds(&self, runtime: &Path) -> bool;
}

impl<F> VersionProbe for F
where
    F: Fn(&Path) -> bool,
{
    fn succeeds(&self, runtime: &Path) -> bool {
        self(runtime)
    }
}

/// Runs `<runtime> -version` and accepts exit status zero.
#[derive(Debug, Clone, Copy)]
pub struct JavaVersionProbe {
    timeout: Duration,
}

impl Default for JavaVersionProbe {
    fn default() -> Self {
        Self {
            timeout: VERSION_PROBE_TIMEOUT,
        }
    }
}

impl VersionProbe for JavaVersionProbe {
    fn succeeds(&self, runtime: &Path) -> bool {
        let mut command = Command::new(runtime);
        command.arg("-version");
        let result = run_command_with_timeout(
            command,
            self.timeout,
            &format!("{} -version", runtime.display()),
        );
        if let Some(error) = &result.error {
            debug!(runtime = %runtime.display(), %error, "version probe failed");
        }
        result.succeeded()
    }
}

pub trait LocateRuntime {
    fn locate(&self) -> Result<RuntimeCandidate, SupervisorError>;
}

pub struct RuntimeLocator<P> {
    candidates: Vec<RuntimeCandidate>,
    search_path: Option<OsString>,
    probe: P,
}

impl<P: VersionProbe> RuntimeLocator<P> {
    pub fn new(candidates: Vec<RuntimeCandidate>, search_path: Option<OsString>, probe: P) -> Self {
        Self {
            candidates,
            search_path,
            probe,
        }
    }

    fn resolve(&self, candidate: &RuntimeCandidate) -> Option<PathBuf> {
        if candidate.is_bare_command() {
            find_on_search_path(&candidate.path, self.search_path.as_deref())
        } else if candidate.path.is_file() {
            Some(candidate.path.clone())
        } else {
            None
        }
    }
}

impl<P: VersionProbe> LocateRuntime for RuntimeLocator<P> {
    fn locate(&self) -> Result<RuntimeCandidate, SupervisorError> {
        for candidate in &self.candidates {
            let Some(resolved) = self.resolve(candidate) else {
                debug!(
                    path = %candidate.path.display(),
                    origin = candidate.origin.as_str(),
                    "runtime candidate not present"
                );
                continue;
            };

            if !self.probe.succeeds(&resolved) {
                debug!(
                    path = %resolved.display(),
                    origin = candidate.origin.as_str(),
                    "runtime candidate failed its version probe"
                );
                continue;
            }

            info!(
                path = %resolved.display(),
                origin = candidate.origin.as_str(),
                "selected Java runtime"
            );
            return Ok(RuntimeCandidate::new(resolved, candidate.origin));
        }

        Err(SupervisorError::RuntimeNotFound {
            checked: self.candidates.len(),
        })
    }
}
