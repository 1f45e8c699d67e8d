pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ipc;
pub mod launcher;
pub mod logging;
mod process_command;
pub mod readiness;
pub mod runtime_locator;
pub mod supervisor;

use rfd::{MessageButtons, MessageDialog, MessageLevel};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tauri::{AppHandle, Emitter, Manager, RunEvent, State, WebviewUrl, WebviewWindowBuilder};
use tracing::{error, info, warn};
use url::Url;

use crate::config::ShellConfig;
use crate::diagnostics::{DiagnosticPresenter, DiagnosticReporter, ErrorReport};
use crate::ipc::{
    is_app_navigation, validate_external_url, DialogKind, DialogOptions, DialogPresenter,
    IpcGateway, IpcRequest, IpcResponse, LinkOpener, NativeDialogs, SystemBrowser,
};
use crate::launcher::JavaLauncher;
use crate::readiness::{HttpHealthCheck, ProbePolicy, TcpListenerCheck};
use crate::runtime_locator::{
    build_candidates, default_well_known_roots, CandidateSources, JavaVersionProbe, RuntimeLocator,
};
use crate::supervisor::{LaunchStages, SequenceOutcome, Supervisor};

const MAIN_WINDOW_LABEL: &str = "main";
const MAIN_WINDOW_TITLE: &str = "Smart Disk Analyzer - Free Open Source Partition Manager";
const MAIN_WINDOW_SIZE: (f64, f64) = (1400.0, 900.0);
const MAIN_WINDOW_MIN_SIZE: (f64, f64) = (1200.0, 700.0);
const BACKEND_DEGRADED_EVENT: &str = "backend-degraded";

/// Fatal reports get a native modal and end the app; degraded ones go to the UI.
struct ShellPresenter {
    app: AppHandle,
}

impl DiagnosticPresenter for ShellPresenter {
    fn present_fatal(&self, report: &ErrorReport) {
        let app = self.app.clone();
        let title = report.title.clone();
        let body = report.dialog_body();
        let scheduled = self.app.run_on_main_thread(move || {
            let _ = MessageDialog::new()
                .set_level(MessageLevel::Error)
                .set_title(title)
                .set_description(body)
                .set_buttons(MessageButtons::Ok)
                .show();
            app.exit(1);
        });

        if let Err(error) = scheduled {
            error!(%error, "could not show startup failure dialog");
            self.app.exit(1);
        }
    }

    fn notify_degraded(&self, report: &ErrorReport) {
        if let Err(error) = self.app.emit(BACKEND_DEGRADED_EVENT, report) {
            warn!(%error, "failed to emit {BACKEND_DEGRADED_EVENT}");
        }
    }
}

#[tauri::command]
fn ipc_invoke(request: IpcRequest, gateway: State<'_, IpcGateway>) -> IpcResponse {
    gateway.dispatch(request)
}

/// Windows only: warns when not elevated. Returns `false` when the user picks "Exit".
fn confirm_privileges(gateway: &IpcGateway) -> bool {
    if !cfg!(target_os = "windows") || gateway.is_elevated() {
        return true;
    }

    let options = DialogOptions {
        kind: DialogKind::Warning,
        title: "Administrator Privileges Required".to_string(),
        message: "Smart Disk Analyzer requires administrator privileges for partition operations."
            .to_string(),
        detail: Some(
            "Please restart the application as administrator.\n\nNote: You can still use disk \
             scanning features without admin privileges."
                .to_string(),
        ),
        buttons: vec!["Continue Anyway".to_string(), "Exit".to_string()],
    };

    match NativeDialogs.show(&options) {
        Ok(choice) => choice == 0,
        Err(error) => {
            warn!(%error, "privilege warning could not be shown; continuing");
            true
        }
    }
}

fn create_main_window(app: &AppHandle, dev_server_url: Option<&str>) -> tauri::Result<()> {
    let dev_server_url = dev_server_url.and_then(|raw| Url::parse(raw).ok());
    let webview_url = match &dev_server_url {
        Some(url) => WebviewUrl::External(url.clone()),
        None => WebviewUrl::App(PathBuf::from("index.html")),
    };

    WebviewWindowBuilder::new(app, MAIN_WINDOW_LABEL, webview_url)
        .title(MAIN_WINDOW_TITLE)
        .inner_size(MAIN_WINDOW_SIZE.0, MAIN_WINDOW_SIZE.1)
        .min_inner_size(MAIN_WINDOW_MIN_SIZE.0, MAIN_WINDOW_MIN_SIZE.1)
        .on_navigation(move |url| {
            if is_app_navigation(url, dev_server_url.as_ref()) {
                return true;
            }

            match validate_external_url(url.as_str()) {
                Ok(url) => {
                    if let Err(error) = SystemBrowser.open(&url) {
                        warn!(%url, %error, "failed to open external link");
                    }
                }
                Err(error) => warn!(%url, %error, "blocked navigation"),
            }
            false
        })
        .build()?;

    info!("main window created");
    Ok(())
}

fn run_startup(app: AppHandle, supervisor: Arc<Supervisor>, config: ShellConfig) {
    let resource_dir = app.path().resource_dir().ok();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let artifact_path = config.artifact_path(resource_dir.as_deref(), &cwd);

    let health = match HttpHealthCheck::new(config.health_url()) {
        Ok(health) => health,
        Err(error) => {
            supervisor.abort_startup(error);
            return;
        }
    };

    let candidates = build_candidates(&CandidateSources {
        resource_dir,
        include_bundled: !config.dev_mode,
        runtime_home: config.runtime_home.clone(),
        well_known_roots: default_well_known_roots(),
    });
    let locator = RuntimeLocator::new(
        candidates,
        std::env::var_os("PATH"),
        JavaVersionProbe::default(),
    );

    let outcome = supervisor.run_launch_sequence(LaunchStages {
        listener_check: &TcpListenerCheck,
        locator: &locator,
        launcher: &JavaLauncher,
        health: &health,
        policy: ProbePolicy::default(),
        artifact_path,
        port: config.backend_port,
        extra_args: Vec::new(),
    });

    match outcome {
        SequenceOutcome::Ready(ready) => {
            let window_app = app.clone();
            let dev_server_url = config.dev_mode.then(|| config.dev_server_url.clone());
            let scheduled = app.run_on_main_thread(move || {
                if let Err(error) = create_main_window(&window_app, dev_server_url.as_deref()) {
                    error!(%error, "failed to create main window");
                    window_app.exit(1);
                }
            });
            if let Err(error) = scheduled {
                error!(%error, "failed to schedule main window creation");
                app.exit(1);
                return;
            }

            if let Some(events) = ready.events {
                supervisor.watch(events);
            }
        }
        SequenceOutcome::Failed(report) => {
            info!(kind = ?report.kind, "startup failed; waiting for diagnostic to close");
        }
        SequenceOutcome::Stopped => info!("startup interrupted by shutdown"),
        SequenceOutcome::AlreadyStarted => {}
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![ipc_invoke])
        .setup(|app| {
            let log_dir = app.path().app_log_dir().ok();
            if let Some(path) = logging::init_logging(log_dir.as_deref()) {
                info!(path = %path.display(), "writing startup log");
            }

            let config = ShellConfig::from_env();
            info!(
                port = config.backend_port,
                dev_mode = config.dev_mode,
                "starting Smart Disk Analyzer"
            );

            let gateway = IpcGateway::for_platform(app.package_info().version.to_string());
            let proceed = confirm_privileges(&gateway);
            app.manage(gateway);
            if !proceed {
                info!("exiting at user request before starting the backend");
                app.handle().exit(0);
                return Ok(());
            }

            let presenter = ShellPresenter {
                app: app.handle().clone(),
            };
            let supervisor = Arc::new(Supervisor::new(DiagnosticReporter::new(
                Box::new(presenter),
                config.backend_port,
            )));
            app.manage(Arc::clone(&supervisor));

            let handle = app.handle().clone();
            thread::Builder::new()
                .name("startup-supervisor".to_string())
                .spawn(move || run_startup(handle, supervisor, config))?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| {
            if let RunEvent::ExitRequested { .. } | RunEvent::Exit = event {
                if let Some(supervisor) = app_handle.try_state::<Arc<Supervisor>>() {
                    if supervisor.stop() {
                        info!("backend supervisor stopped");
                    }
                }
            }
        });
}
