use rfd::{MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
#[cfg(target_os = "windows")]
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::process_command::hide_console_window;
#[cfg(target_os = "windows")]
use crate::process_command::run_command_with_timeout;

#[cfg(target_os = "windows")]
const PRIVILEGE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_DIALOG_BUTTONS: usize = 3;

/// Everything the UI may ask of the shell. Unknown `op` values fail to deserialize, so
/// they never reach `IpcGateway::dispatch`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IpcRequest {
    GetVersion,
    CheckElevatedPrivileges,
    OpenExternal { url: String },
    ShowDialog { options: DialogOptions },
}

impl IpcRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::GetVersion => "getVersion",
            Self::CheckElevatedPrivileges => "checkElevatedPrivileges",
            Self::OpenExternal { .. } => "openExternal",
            Self::ShowDialog { .. } => "showDialog",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    #[default]
    #[serde(alias = "none", alias = "question")]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogOptions {
    #[serde(default, alias = "type")]
    pub kind: DialogKind,
    #[serde(default)]
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IpcResult {
    Version(String),
    Elevated(bool),
    Opened,
    Choice(usize),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IpcResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn from_result(request_id: String, result: Result<IpcResult, String>) -> Self {
        match result {
            Ok(result) => Self {
                request_id,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                request_id,
                ok: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Answers "is this process elevated?" by attempting something only an elevated
/// process may do. Failures mean "not elevated".
pub trait PrivilegeProbe: Send + Sync {
    fn is_elevated(&self) -> bool;
}

/// Windows: `net session` only succeeds for administrators.
#[cfg(target_os = "windows")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NetSessionProbe;

#[cfg(target_os = "windows")]
impl PrivilegeProbe for NetSessionProbe {
    fn is_elevated(&self) -> bool {
        let mut command = Command::new("net");
        command.arg("session");
        let result = run_command_with_timeout(command, PRIVILEGE_PROBE_TIMEOUT, "net session");
        if let Some(error) = &result.error {
            debug!(%error, "net session check failed");
        }
        result.succeeded()
    }
}

/// Partition operations only ask for elevation on Windows; elsewhere the shell never
/// reports itself as elevated.
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverElevated;

#[cfg(not(target_os = "windows"))]
impl PrivilegeProbe for NeverElevated {
    fn is_elevated(&self) -> bool {
        false
    }
}

pub fn platform_privilege_probe() -> Box<dyn PrivilegeProbe> {
    #[cfg(target_os = "windows")]
    {
        Box::new(NetSessionProbe)
    }

    #[cfg(not(target_os = "windows"))]
    {
        Box::new(NeverElevated)
    }
}

pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &Url) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl LinkOpener for SystemBrowser {
    fn open(&self, url: &Url) -> Result<(), String> {
        open_url_in_default_browser(url.as_str())
    }
}

fn command_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

pub(crate) fn open_url_in_default_browser(url: &str) -> Result<(), String> {
    #[cfg(target_os = "linux")]
    let (program, mut command) = {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        ("xdg-open", command)
    };

    #[cfg(target_os = "macos")]
    let (program, mut command) = {
        let mut command = Command::new("open");
        command.arg(url);
        ("open", command)
    };

    #[cfg(target_os = "windows")]
    let (program, mut command) = {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", "", url]);
        ("cmd start", command)
    };

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = url;
        return Err("Opening browser is unsupported on this platform.".to_string());
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    {
        hide_console_window(&mut command);
        command
            .current_dir(command_cwd())
            .spawn()
            .map(|_| ())
            .map_err(|error| format!("Failed to launch {program}: {error}"))
    }
}

pub trait DialogPresenter: Send + Sync {
    /// Returns the index of the chosen button.
    fn show(&self, options: &DialogOptions) -> Result<usize, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDialogs;

impl DialogPresenter for NativeDialogs {
    fn show(&self, options: &DialogOptions) -> Result<usize, String> {
        let level = match options.kind {
            DialogKind::Info => MessageLevel::Info,
            DialogKind::Warning => MessageLevel::Warning,
            DialogKind::Error => MessageLevel::Error,
        };
        let description = match &options.detail {
            Some(detail) if !detail.trim().is_empty() => format!("{}\n\n{detail}", options.message),
            _ => options.message.clone(),
        };

        let result = MessageDialog::new()
            .set_level(level)
            .set_title(&options.title)
            .set_description(description)
            .set_buttons(dialog_buttons(&options.buttons)?)
            .show();
        Ok(dialog_choice(&options.buttons, &result))
    }
}

pub(crate) fn dialog_buttons(labels: &[String]) -> Result<MessageButtons, String> {
    match labels {
        [] => Ok(MessageButtons::Ok),
        [only] => Ok(MessageButtons::OkCustom(only.clone())),
        [first, second] => Ok(MessageButtons::OkCancelCustom(first.clone(), second.clone())),
        [first, second, third] => Ok(MessageButtons::YesNoCancelCustom(
            first.clone(),
            second.clone(),
            third.clone(),
        )),
        _ => Err(format!(
            "showDialog supports at most {MAX_DIALOG_BUTTONS} buttons (got {}).",
            labels.len()
        )),
    }
}

pub(crate) fn dialog_choice(labels: &[String], result: &MessageDialogResult) -> usize {
    let last = labels.len().saturating_sub(1);
    match result {
        MessageDialogResult::Custom(label) => labels
            .iter()
            .position(|candidate| candidate == label)
            .unwrap_or(last),
        MessageDialogResult::Ok | MessageDialogResult::Yes => 0,
        MessageDialogResult::No => 1.min(last),
        MessageDialogResult::Cancel => last,
    }
}

pub fn validate_external_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("URL must not be empty.".to_string());
    }

    let url = Url::parse(trimmed).map_err(|error| format!("URL is not valid: {error}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err("URL must start with http:// or https://.".to_string());
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("URL must include a host.".to_string());
    }

    Ok(url)
}

/// Whether a webview navigation stays inside the app (bundled assets or the dev server).
pub fn is_app_navigation(url: &Url, dev_server_url: Option<&Url>) -> bool {
    if url.scheme() == "tauri" || url.host_str() == Some("tauri.localhost") {
        return true;
    }
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    dev_server_url.is_some_and(|dev| dev.origin() == url.origin())
}

/// The single dispatch point behind the `ipc_invoke` command.
pub struct IpcGateway {
    version: String,
    privileges: Box<dyn PrivilegeProbe>,
    links: Box<dyn LinkOpener>,
    dialogs: Box<dyn DialogPresenter>,
}

impl IpcGateway {
    pub fn new(
        version: impl Into<String>,
        privileges: Box<dyn PrivilegeProbe>,
        links: Box<dyn LinkOpener>,
        dialogs: Box<dyn DialogPresenter>,
    ) -> Self {
        Self {
            version: version.into(),
            privileges,
            links,
            dialogs,
        }
    }

    pub fn for_platform(version: impl Into<String>) -> Self {
        Self::new(
            version,
            platform_privilege_probe(),
            Box::new(SystemBrowser),
            Box::new(NativeDialogs),
        )
    }

    pub fn is_elevated(&self) -> bool {
        self.privileges.is_elevated()
    }

    pub fn dispatch(&self, request: IpcRequest) -> IpcResponse {
        let request_id = request_id();
        debug!(op = request.op_name(), %request_id, "ipc request");

        let result = match request {
            IpcRequest::GetVersion => Ok(IpcResult::Version(self.version.clone())),
            IpcRequest::CheckElevatedPrivileges => Ok(IpcResult::Elevated(self.is_elevated())),
            IpcRequest::OpenExternal { url } => validate_external_url(&url)
                .and_then(|url| self.links.open(&url))
                .map(|()| IpcResult::Opened),
            IpcRequest::ShowDialog { options } => self.show_dialog(&options),
        };

        if let Err(error) = &result {
            warn!(%request_id, %error, "ipc request failed");
        }
        IpcResponse::from_result(request_id, result)
    }

    fn show_dialog(&self, options: &DialogOptions) -> Result<IpcResult, String> {
        if options.message.trim().is_empty() {
            return Err("Dialog message must not be empty.".to_string());
        }
        if options.buttons.len() > MAX_DIALOG_BUTTONS {
            return Err(format!(
                "showDialog supports at most {MAX_DIALOG_BUTTONS} buttons (got {}).",
                options.buttons.len()
            ));
        }

        self.dialogs.show(options).map(IpcResult::Choice)
    }
}
