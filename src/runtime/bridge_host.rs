//! TauriBridgeHost - runtime implementation of the BridgeHost trait.
//!
//! Outbound envelopes are emitted as `bridge://message` events. The envelope
//! text is embedded verbatim as raw JSON so the webview receives the object,
//! not a string. Dialogs go through `tauri-plugin-dialog`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::value::RawValue;
use tauri::{AppHandle, Emitter};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tokio::sync::oneshot;

use crate::protocols::host::{BridgeHost, SaveDialogRequest};

/// Event name for envelopes posted to the UI
pub const EVENT_BRIDGE_MESSAGE: &str = "bridge://message";

pub struct TauriBridgeHost {
    app: AppHandle,
}

impl TauriBridgeHost {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

#[async_trait]
impl BridgeHost for TauriBridgeHost {
    fn post_raw(&self, json: String) {
        let raw = match RawValue::from_string(json) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Refusing to emit invalid envelope JSON: {e}");
                return;
            }
        };

        if let Err(e) = self.app.emit(EVENT_BRIDGE_MESSAGE, raw) {
            log::error!("Failed to emit {EVENT_BRIDGE_MESSAGE} event: {e}");
        }
    }

    async fn pick_save_path(&self, request: SaveDialogRequest) -> Option<PathBuf> {
        let (tx, rx) = oneshot::channel();
        let extensions: Vec<&str> = request.extensions.iter().map(String::as_str).collect();

        let mut dialog = self
            .app
            .dialog()
            .file()
            .set_title(&request.title)
            .set_file_name(&request.file_name)
            .add_filter(&request.filter_name, &extensions);
        if let Some(dir) = &request.directory {
            dialog = dialog.set_directory(dir);
        }

        dialog.save_file(move |path| {
            let _ = tx.send(path);
        });

        let chosen = match rx.await {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(_) => {
                log::warn!("Save dialog closed without a response");
                return None;
            }
        };

        match chosen.into_path() {
            Ok(path) => {
                log::debug!("Save dialog chose {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Save dialog returned an unusable path: {e}");
                None
            }
        }
    }

    fn notify_error(&self, title: &str, message: &str) {
        log::debug!("Showing error dialog: {title}");
        self.app
            .dialog()
            .message(message)
            .title(title)
            .kind(MessageDialogKind::Error)
            .show(|_| {});
    }
}
