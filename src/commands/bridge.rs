//! Bridge command: the UI's single entry point for envelopes.

use std::sync::Arc;

use serde_json::Value;
use tauri::State;

use crate::api::types::ApiError;
use crate::runtime::dispatcher::{DispatchTicket, Dispatcher};

fn bridge_post_inner(dispatcher: &Arc<Dispatcher>, message: Value) -> DispatchTicket {
    let ticket = dispatcher.dispatch(message);
    log::debug!(
        "bridge_post routed: type={:?}, route={:?}",
        ticket.kind,
        ticket.route
    );
    ticket
}

/// Posts an envelope from the UI to the host.
///
/// Accepts either an envelope object or a JSON string containing one. The
/// string form keeps the payload text byte for byte. Returns once the
/// message is routed; replies arrive later as `bridge://message` events.
#[tauri::command]
#[specta::specta]
pub async fn bridge_post(
    dispatcher: State<'_, Arc<Dispatcher>>,
    message: Value,
) -> Result<(), ApiError> {
    bridge_post_inner(dispatcher.inner(), message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::protocols::testing::RecordingHost;
    use crate::runtime::dispatcher::Route;
    use crate::runtime::path::HostPaths;
    use crate::runtime::project_state::ProjectStateStore;
    use crate::runtime::update_service::UpdateService;
    use serde_json::json;
    use std::env;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_bridge_post_accepts_string_and_object() {
        let root = env::temp_dir().join(format!("bridge_cmd_{}", Uuid::new_v4()));
        let paths = HostPaths {
            install_dir: root.clone(),
            data_dir: root.join("data"),
            temp_root: root.join("tmp"),
            error_log_dir: root.clone(),
            documents_dir: None,
        };
        let config = HostConfig::default();
        let host = Arc::new(RecordingHost::default());
        let dispatcher = Arc::new(Dispatcher::new(
            host.clone(),
            paths.clone(),
            &config,
            Arc::new(ProjectStateStore::new(
                paths.state_file(),
                Duration::from_millis(50),
            )),
            Arc::new(UpdateService::new(config.update.clone(), paths.temp_root.clone()).unwrap()),
        ));

        let object = json!({"type": "ifc_export", "payload": {"floors": []}});
        let ticket = bridge_post_inner(&dispatcher, object.clone());
        assert_eq!(ticket.route, Some(Route::IfcExport));
        ticket.handle.await.unwrap();

        let ticket = bridge_post_inner(&dispatcher, Value::String(object.to_string()));
        assert_eq!(ticket.route, Some(Route::IfcExport));
        ticket.handle.await.unwrap();

        let replies = host.envelopes();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], replies[1]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
