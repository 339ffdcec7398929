//! In-memory `BridgeHost` used by unit tests.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::host::{BridgeHost, SaveDialogRequest};

/// Records every posted envelope and answers save dialogs with a fixed path.
#[derive(Default)]
pub struct RecordingHost {
    pub posted: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, String)>>,
    pub save_path: Mutex<Option<PathBuf>>,
    pub dialogs: Mutex<Vec<SaveDialogRequest>>,
}

impl RecordingHost {
    pub fn with_save_path(path: PathBuf) -> Self {
        Self {
            save_path: Mutex::new(Some(path)),
            ..Self::default()
        }
    }

    /// Posted envelopes parsed back into JSON values.
    pub fn envelopes(&self) -> Vec<Value> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Posted envelopes of one type.
    pub fn of_type(&self, kind: &str) -> Vec<Value> {
        self.envelopes()
            .into_iter()
            .filter(|e| e["type"] == kind)
            .collect()
    }
}

#[async_trait]
impl BridgeHost for RecordingHost {
    fn post_raw(&self, json: String) {
        self.posted.lock().unwrap().push(json);
    }

    async fn pick_save_path(&self, request: SaveDialogRequest) -> Option<PathBuf> {
        self.dialogs.lock().unwrap().push(request);
        self.save_path.lock().unwrap().clone()
    }

    fn notify_error(&self, title: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}
