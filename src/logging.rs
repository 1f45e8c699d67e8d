use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const STARTUP_LOG_FILE: &str = "startup.log";

/// Creates `<log_dir>/startup.log`, truncating the previous run's log.
pub(crate) fn open_startup_log(log_dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(STARTUP_LOG_FILE);
    let file = File::create(&path)?;
    Ok((path, file))
}

/// Console logging plus the best-effort startup log. Returns the log file path when one
/// could be opened. Safe to call more than once; only the first call installs anything.
pub fn init_logging(log_dir: Option<&Path>) -> Option<PathBuf> {
    let startup_log = log_dir.and_then(|dir| match open_startup_log(dir) {
        Ok(opened) => Some(opened),
        Err(error) => {
            eprintln!("[startup] could not open {STARTUP_LOG_FILE} in {}: {error}", dir.display());
            None
        }
    });

    let (log_path, file_layer) = match startup_log {
        Some((path, file)) => (
            Some(path),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
        ),
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        log_path
    } else {
        None
    }
}
