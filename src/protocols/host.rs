//! BridgeHost trait: handler → UI surface boundary.
//!
//! Handlers never talk to the webview directly. They post envelopes and ask
//! for native dialogs through this trait, which the runtime implements on top
//! of the Tauri app handle (`TauriBridgeHost`) and tests implement in memory.

use std::path::PathBuf;

use async_trait::async_trait;

use super::envelope::{encode, OutboundEnvelope};

/// Native "save file" dialog request.
#[derive(Debug, Clone)]
pub struct SaveDialogRequest {
    pub title: String,
    pub file_name: String,
    pub filter_name: String,
    pub extensions: Vec<String>,
    pub directory: Option<PathBuf>,
}

/// Callback interface for dispatcher handlers.
#[async_trait]
pub trait BridgeHost: Send + Sync {
    /// Post already-encoded envelope text to the UI surface.
    ///
    /// Delivery failures are logged by the implementation; handlers treat
    /// posting as fire-and-forget.
    fn post_raw(&self, json: String);

    /// Ask the user where to save a file. `None` means the dialog was cancelled.
    async fn pick_save_path(&self, request: SaveDialogRequest) -> Option<PathBuf>;

    /// Show a native error dialog without waiting for it to be dismissed.
    fn notify_error(&self, title: &str, message: &str);

    /// Encode and post an envelope.
    fn post(&self, envelope: OutboundEnvelope) {
        log::debug!("Posting bridge envelope: type={}", envelope.kind());
        self.post_raw(encode(&envelope));
    }
}
