//! ProjectStateStore - persists the UI's project state across restarts.
//!
//! Export is a round trip through the UI: the host posts
//! `export_project_state`, the UI answers with `export_project_state_result`
//! carrying its state, and the host writes that to the state file. Only one
//! export can be outstanding; a newer request supersedes the older one.
//!
//! Import reads the state file and posts it back as `import_project_state`.
//! The payload text is stored and replayed unchanged in both directions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::value::RawValue;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

use crate::api::types::ApiError;
use crate::protocols::envelope::{
    encode, BridgeEnvelope, VerbatimEnvelope, TYPE_EXPORT_PROJECT_STATE,
    TYPE_IMPORT_PROJECT_STATE,
};
use crate::protocols::host::BridgeHost;

/// Export request waiting for the UI's answer.
struct PendingExport {
    request_id: u64,
    completion: oneshot::Sender<bool>,
}

pub struct ProjectStateStore {
    state_file: PathBuf,
    export_timeout: Duration,
    pending: Mutex<Option<PendingExport>>,
    /// Held for the duration of every state file read or write
    io_lock: Mutex<()>,
    next_request_id: AtomicU64,
}

impl ProjectStateStore {
    pub fn new(state_file: PathBuf, export_timeout: Duration) -> Self {
        Self {
            state_file,
            export_timeout,
            pending: Mutex::new(None),
            io_lock: Mutex::new(()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Ask the UI for its state and wait until it has been saved.
    ///
    /// Resolves `false` on timeout, when superseded by a newer request, or
    /// when saving failed. Never errors.
    pub async fn request_export(&self, host: &dyn BridgeHost) -> bool {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut slot = self.pending.lock().await;
            let previous = slot.replace(PendingExport {
                request_id,
                completion: tx,
            });
            if let Some(previous) = previous {
                log::debug!(
                    "Export request {} superseded by {request_id}",
                    previous.request_id
                );
                let _ = previous.completion.send(false);
            }
        }

        log::info!("Requesting project state export: request={request_id}");
        host.post(BridgeEnvelope::signal(TYPE_EXPORT_PROJECT_STATE).into());

        match timeout(self.export_timeout, rx).await {
            Ok(Ok(saved)) => {
                log::info!("Project state export finished: request={request_id}, saved={saved}");
                saved
            }
            Ok(Err(_)) => false,
            Err(_) => {
                let mut slot = self.pending.lock().await;
                if slot.as_ref().is_some_and(|p| p.request_id == request_id) {
                    slot.take();
                }
                log::warn!(
                    "Project state export timed out after {:?}: request={request_id}",
                    self.export_timeout
                );
                false
            }
        }
    }

    /// Handle the UI's `export_project_state_result` payload.
    ///
    /// Writes the payload text to the state file as is and resolves the
    /// pending request with the outcome. A missing or null payload saves
    /// nothing.
    pub async fn complete_export(&self, payload: Option<&RawValue>) -> bool {
        let pending = self.pending.lock().await.take();

        let saved = match payload.filter(|p| p.get() != "null") {
            None => {
                log::warn!("Project state result has no payload, nothing saved");
                false
            }
            Some(payload) => match self.write_state(payload.get().as_bytes()).await {
                Ok(bytes) => {
                    log::info!(
                        "Project state saved: path={}, bytes={bytes}",
                        self.state_file.display()
                    );
                    true
                }
                Err(e) => {
                    log::error!("Failed to save project state: {e}");
                    false
                }
            },
        };

        match pending {
            Some(pending) => {
                let _ = pending.completion.send(saved);
            }
            None => log::info!("Project state result arrived with no export pending"),
        }

        saved
    }

    /// Post the saved state back to the UI.
    ///
    /// # Returns
    /// * `Ok(true)` - state posted
    /// * `Ok(false)` - no state file yet
    pub async fn import(&self, host: &dyn BridgeHost) -> Result<bool, ApiError> {
        let content = {
            let _guard = self.io_lock.lock().await;
            match tokio::fs::read_to_string(&self.state_file).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::info!("No project state at {}", self.state_file.display());
                    return Ok(false);
                }
                Err(e) => {
                    return Err(ApiError::IoFailure {
                        message: format!("Failed to read {}: {e}", self.state_file.display()),
                    })
                }
            }
        };

        let payload: &RawValue = serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .map_err(|e| ApiError::IoFailure {
                message: format!("Project state file is not valid JSON: {e}"),
            })?;

        log::debug!("Posting bridge envelope: type={TYPE_IMPORT_PROJECT_STATE}");
        host.post_raw(encode(&VerbatimEnvelope {
            kind: TYPE_IMPORT_PROJECT_STATE,
            payload,
        }));
        log::info!("Project state imported: bytes={}", content.len());
        Ok(true)
    }

    /// Replace the state file through a sibling temp file so a failed write
    /// leaves the previous state intact.
    async fn write_state(&self, content: &[u8]) -> Result<usize, ApiError> {
        let _guard = self.io_lock.lock().await;
        let parent = self
            .state_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|e| ApiError::IoFailure {
                    message: format!("Failed to create {}: {e}", parent.display()),
                })?;
        }

        let temp_path = parent.join(format!(".tmp_state_{}", Uuid::new_v4()));
        if let Err(e) = write_synced(&temp_path, content).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.state_file).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ApiError::IoFailure {
                message: format!("Failed to replace {}: {e}", self.state_file.display()),
            });
        }

        Ok(content.len())
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> Result<(), ApiError> {
    let io_error = |e: std::io::Error| ApiError::IoFailure {
        message: format!("Failed to write {}: {e}", path.display()),
    };

    let mut file = tokio::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .map_err(io_error)?;
    file.write_all(content).await.map_err(io_error)?;
    file.flush().await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::testing::RecordingHost;
    use serde_json::{json, Value};
    use std::env;
    use std::sync::Arc;

    const UI_STATE: &str =
        r#"{"zeta":1,"alpha":12345678901234567890123,"mid":0.10000000000000000001}"#;

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_string()).unwrap()
    }

    fn test_store(timeout_ms: u64) -> (ProjectStateStore, PathBuf) {
        let dir = env::temp_dir().join(format!("project_state_{}", Uuid::new_v4()));
        let store = ProjectStateStore::new(
            dir.join("state").join("wind_analysis_state.json"),
            Duration::from_millis(timeout_ms),
        );
        (store, dir)
    }

    #[tokio::test]
    async fn test_export_without_answer_times_out_false() {
        let (store, dir) = test_store(50);
        let host = RecordingHost::default();

        assert!(!store.request_export(&host).await);
        assert_eq!(host.of_type(TYPE_EXPORT_PROJECT_STATE).len(), 1);
        assert!(!store.state_file().exists());

        // Late answer is still written
        assert!(store.complete_export(Some(&raw(r#"{"zones":["north"]}"#))).await);
        assert!(store.state_file().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_export_round_trip_writes_state_file() {
        let (store, dir) = test_store(2000);
        let store = Arc::new(store);
        let host = Arc::new(RecordingHost::default());

        let waiter = {
            let store = store.clone();
            let host = host.clone();
            tokio::spawn(async move { store.request_export(host.as_ref()).await })
        };

        // Wait until the request has been posted before answering
        for _ in 0..100 {
            if !host.of_type(TYPE_EXPORT_PROJECT_STATE).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let state = json!({"project": "Tower A", "zones": [{"name": "north"}]});
        assert!(store.complete_export(Some(&raw(&state.to_string()))).await);
        assert!(waiter.await.unwrap());

        let bytes = std::fs::read(store.state_file()).unwrap();
        assert_eq!(bytes[0], b'{');
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), state);

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_newer_request_supersedes_older() {
        let (store, dir) = test_store(2000);
        let store = Arc::new(store);
        let host = Arc::new(RecordingHost::default());

        let first = {
            let store = store.clone();
            let host = host.clone();
            tokio::spawn(async move { store.request_export(host.as_ref()).await })
        };
        for _ in 0..100 {
            if !host.of_type(TYPE_EXPORT_PROJECT_STATE).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = {
            let store = store.clone();
            let host = host.clone();
            tokio::spawn(async move { store.request_export(host.as_ref()).await })
        };

        // The first waiter resolves as soon as the second takes the slot
        assert!(!first.await.unwrap());

        assert!(store.complete_export(Some(&raw(r#"{"v":2}"#))).await);
        assert!(second.await.unwrap());

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_null_payload_saves_nothing() {
        let (store, dir) = test_store(50);
        assert!(!store.complete_export(None).await);
        assert!(!store.complete_export(Some(&raw("null"))).await);
        assert!(!store.state_file().exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_import_absent_and_present() {
        let (store, dir) = test_store(50);
        let host = RecordingHost::default();

        assert!(!store.import(&host).await.unwrap());
        assert!(host.envelopes().is_empty());

        let state = json!({"project": "Tower A"});
        assert!(store.complete_export(Some(&raw(&state.to_string()))).await);
        assert!(store.import(&host).await.unwrap());

        let imported = host.of_type(TYPE_IMPORT_PROJECT_STATE);
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0]["payload"], state);

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_import_invalid_file_is_error() {
        let (store, dir) = test_store(50);
        std::fs::create_dir_all(store.state_file().parent().unwrap()).unwrap();
        std::fs::write(store.state_file(), "{ broken").unwrap();

        let host = RecordingHost::default();
        assert!(matches!(
            store.import(&host).await,
            Err(ApiError::IoFailure { .. })
        ));
        assert!(host.envelopes().is_empty());

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_state_text_is_saved_and_imported_verbatim() {
        let (store, dir) = test_store(50);
        let host = RecordingHost::default();

        assert!(store.complete_export(Some(&raw(UI_STATE))).await);
        assert_eq!(std::fs::read(store.state_file()).unwrap(), UI_STATE.as_bytes());

        assert!(store.import(&host).await.unwrap());
        let posted = host.posted.lock().unwrap().clone();
        assert_eq!(
            posted,
            vec![format!(r#"{{"type":"import_project_state","payload":{UI_STATE}}}"#)]
        );

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_save_replaces_file_without_leftovers() {
        let (store, dir) = test_store(50);

        assert!(store.complete_export(Some(&raw(r#"{"v":1}"#))).await);
        assert!(store.complete_export(Some(&raw(r#"{"v":2}"#))).await);

        assert_eq!(std::fs::read_to_string(store.state_file()).unwrap(), r#"{"v":2}"#);
        let entries: Vec<_> = std::fs::read_dir(store.state_file().parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("wind_analysis_state.json")]);

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_state() {
        let (store, dir) = test_store(50);
        assert!(store.complete_export(Some(&raw(r#"{"v":1}"#))).await);

        // A directory in place of the target makes the final rename fail
        let blocked = ProjectStateStore::new(
            store.state_file().parent().unwrap().to_path_buf(),
            Duration::from_millis(50),
        );
        assert!(!blocked.complete_export(Some(&raw(r#"{"v":2}"#))).await);

        assert_eq!(std::fs::read_to_string(store.state_file()).unwrap(), r#"{"v":1}"#);
        let leftovers = std::fs::read_dir(&dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".tmp_state_")
            })
            .count();
        assert_eq!(leftovers, 0);

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }
}
