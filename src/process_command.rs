use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const COMMAND_TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub(crate) struct CommandResult {
    pub(crate) exit_code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) error: Option<String>,
}

impl CommandResult {
    pub(crate) fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    fn failed(error: String) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
        }
    }
}

/// Keeps helper processes from flashing a console window on Windows.
pub(crate) fn hide_console_window(command: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = command;
    }
}

pub(crate) fn run_command_with_timeout(
    mut command: Command,
    timeout: Duration,
    context: &str,
) -> CommandResult {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    hide_console_window(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => return CommandResult::failed(format!("Failed to execute {context}: {error}")),
    };

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => {
                return match child.wait_with_output() {
                    Ok(output) => CommandResult {
                        exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                        error: None,
                    },
                    Err(error) => CommandResult::failed(format!(
                        "Failed to collect command output for {context}: {error}"
                    )),
                };
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return CommandResult::failed(format!(
                        "Command {context} timed out after {} ms and was terminated.",
                        timeout.as_millis()
                    ));
                }

                thread::sleep(COMMAND_TIMEOUT_POLL_INTERVAL);
            }
            Err(error) => {
                return CommandResult::failed(format!("Failed while waiting for {context}: {error}"));
            }
        }
    }
}

pub(crate) fn should_treat_as_already_stopped(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such process")
        || lower.contains("not found")
        || lower.contains("cannot find")
        || lower.contains("not running")
}

/// Asks the process to shut down (SIGTERM / `taskkill` without `/F`).
pub(crate) fn send_terminate_signal(pid: u32) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = Command::new("taskkill");
        command.args(["/PID", &pid.to_string(), "/T"]);
        command
    };

    #[cfg(not(target_os = "windows"))]
    let mut command = {
        let mut command = Command::new("kill");
        command.args(["-TERM", &pid.to_string()]);
        command
    };

    hide_console_window(&mut command);
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|error| format!("Failed to signal PID {pid}: {error}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if should_treat_as_already_stopped(&stderr) {
        return Ok(());
    }

    Err(format!("Terminating PID {pid} failed: {}", stderr.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_already_stopped_messages() {
        assert!(should_treat_as_already_stopped("kill: (4242) - No such process"));
        assert!(should_treat_as_already_stopped(
            "ERROR: The process \"4242\" not found."
        ));
        assert!(!should_treat_as_already_stopped("Operation not permitted"));
    }

    #[test]
    fn reports_spawn_errors_without_exit_code() {
        let result = run_command_with_timeout(
            Command::new("definitely-not-a-real-binary-7f3a"),
            Duration::from_secs(1),
            "missing binary",
        );
        assert!(!result.succeeded());
        assert_eq!(result.exit_code, None);
        assert!(result
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("Failed to execute missing binary"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo ready; exit 3"]);
        let result = run_command_with_timeout(command, Duration::from_secs(5), "sh");
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.trim(), "ready");
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn kills_commands_that_exceed_the_timeout() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_command_with_timeout(command, Duration::from_millis(200), "sleep");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(result.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_signal_stops_a_running_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        send_terminate_signal(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
