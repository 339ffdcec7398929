//! Native host for the BUD Sustainable Building Designer.
//!
//! The web UI talks to the host through one command (`bridge_post`) and one
//! event (`bridge://message`). Everything else in this crate sits behind that
//! pair: tool processes, the background worker, project state and updates.

pub mod api;
pub mod commands;
pub mod config;
pub mod protocols;
pub mod runtime;
pub mod updates;

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tauri::webview::PageLoadEvent;
use tauri::{AppHandle, Manager};
use tauri_plugin_log::{Target, TargetKind};

use crate::config::HostConfig;
use crate::runtime::bridge_host::TauriBridgeHost;
use crate::runtime::dispatcher::Dispatcher;
use crate::runtime::path::{current_install_dir, file_timestamp, HostPaths, APP_NAME};
use crate::runtime::project_state::ProjectStateStore;
use crate::runtime::update_service::UpdateService;
use crate::runtime::worker::WorkerSupervisor;

/// Label of the window that hosts the UI
pub const MAIN_WINDOW: &str = "main";

/// Set once the close sequence has started
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

fn specta_builder() -> tauri_specta::Builder<tauri::Wry> {
    tauri_specta::Builder::<tauri::Wry>::new().commands(tauri_specta::collect_commands![
        commands::bridge::bridge_post,
        commands::project_state::project_state_save,
        commands::project_state::project_state_restore,
        commands::worker::worker_status,
    ])
}

fn log_plugin() -> tauri::plugin::TauriPlugin<tauri::Wry> {
    let log_file = format!("{}_pid{}", file_timestamp(), std::process::id());

    tauri_plugin_log::Builder::new()
        .level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper_util", log::LevelFilter::Warn)
        .targets([
            Target::new(TargetKind::Stdout),
            Target::new(TargetKind::LogDir {
                file_name: Some(log_file),
            }),
        ])
        .build()
}

fn resolve_paths(app: &AppHandle) -> Result<HostPaths, Box<dyn Error>> {
    let path = app.path();
    let install_dir = current_install_dir()?;
    let data_dir = path.local_data_dir()?.join(APP_NAME);
    let error_log_dir = path.desktop_dir().unwrap_or_else(|_| data_dir.clone());

    Ok(HostPaths {
        install_dir,
        data_dir,
        temp_root: std::env::temp_dir(),
        error_log_dir,
        documents_dir: path.document_dir().ok(),
    })
}

fn setup_host(app: &AppHandle) -> Result<(), Box<dyn Error>> {
    let paths = resolve_paths(app)?;
    let config_dir: PathBuf = app.path().app_config_dir()?;
    let config = HostConfig::load(&config_dir);

    let info = app.package_info();
    log::info!(
        "{} v{} starting: os={}, arch={}, install_dir={}",
        info.name,
        info.version,
        std::env::consts::OS,
        std::env::consts::ARCH,
        paths.install_dir.display()
    );
    log::debug!(
        "Host paths: data_dir={}, temp_root={}, error_log_dir={}",
        paths.data_dir.display(),
        paths.temp_root.display(),
        paths.error_log_dir.display()
    );

    let host = Arc::new(TauriBridgeHost::new(app.clone()));
    let project_state = Arc::new(ProjectStateStore::new(
        paths.state_file(),
        Duration::from_millis(config.project_state.export_timeout_ms),
    ));
    let updates = Arc::new(UpdateService::new(
        config.update.clone(),
        paths.temp_root.clone(),
    )?);
    let worker = Arc::new(WorkerSupervisor::new(
        paths.executable(&config.worker.executable),
        paths.install_dir.clone(),
        &config.worker,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        host.clone(),
        paths,
        &config,
        project_state.clone(),
        updates,
    ));

    app.manage(host);
    app.manage(project_state);
    app.manage(dispatcher);
    app.manage(worker.clone());

    tauri::async_runtime::spawn(async move {
        match worker.start().await {
            Ok(Some(handle)) => log::info!("Background worker running: pid={}", handle.pid),
            Ok(None) => {}
            Err(e) => log::error!("Failed to start background worker: {e}"),
        }
    });

    Ok(())
}

/// Push the saved project state into a freshly loaded page.
fn restore_project_state(app: &AppHandle) {
    let (Some(store), Some(host)) = (
        app.try_state::<Arc<ProjectStateStore>>(),
        app.try_state::<Arc<TauriBridgeHost>>(),
    ) else {
        log::warn!("Page loaded before host setup; skipping state import");
        return;
    };
    let store = store.inner().clone();
    let host = host.inner().clone();

    tauri::async_runtime::spawn(async move {
        match store.import(host.as_ref()).await {
            Ok(true) => log::info!("Project state imported"),
            Ok(false) => log::debug!("No saved project state"),
            Err(e) => log::error!("Project state import failed: {e}"),
        }
    });
}

/// Save the project state, stop the worker and exit.
fn shut_down(app: AppHandle) {
    tauri::async_runtime::spawn(async move {
        if let (Some(store), Some(host)) = (
            app.try_state::<Arc<ProjectStateStore>>(),
            app.try_state::<Arc<TauriBridgeHost>>(),
        ) {
            let saved = store.request_export(host.inner().as_ref()).await;
            log::info!("Project state saved on close: {saved}");
        }
        if let Some(worker) = app.try_state::<Arc<WorkerSupervisor>>() {
            worker.stop().await;
        }
        app.exit(0);
    });
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let specta = specta_builder();

    #[cfg(debug_assertions)]
    if let Err(e) = specta.export(
        specta_typescript::Typescript::default(),
        "ui/bindings.ts",
    ) {
        eprintln!("Failed to export TypeScript bindings: {e}");
    }

    let mut builder = tauri::Builder::default();

    #[cfg(desktop)]
    {
        builder = builder.plugin(tauri_plugin_single_instance::init(|app, _argv, _cwd| {
            if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
                let _ = window.unminimize();
                let _ = window.set_focus();
            }
        }));
    }

    let app = builder
        .plugin(log_plugin())
        .plugin(tauri_plugin_dialog::init())
        .invoke_handler(specta.invoke_handler())
        .setup(|app| {
            setup_host(app.handle())?;
            Ok(())
        })
        .on_page_load(|webview, payload| {
            if webview.label() == MAIN_WINDOW && matches!(payload.event(), PageLoadEvent::Finished) {
                restore_project_state(webview.app_handle());
            }
        })
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW {
                return;
            }
            if let tauri::WindowEvent::CloseRequested { api, .. } = event {
                api.prevent_close();
                if SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
                    log::debug!("Close already in progress");
                    return;
                }
                log::info!("Main window close requested");
                shut_down(window.app_handle().clone());
            }
        })
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error while building tauri application: {e}");
            std::process::exit(1);
        }
    };

    app.run(|app_handle, event| {
        if let tauri::RunEvent::Exit = event {
            if let Some(worker) = app_handle.try_state::<Arc<WorkerSupervisor>>() {
                let worker = worker.inner().clone();
                tauri::async_runtime::block_on(async move { worker.stop().await });
            }
            log::info!("Host exited");
        }
    });
}
