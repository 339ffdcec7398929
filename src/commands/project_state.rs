//! Project state commands.
//!
//! Expose the export/import round trip on demand. The host also runs both
//! automatically: import after the page loads, export before the window closes.

use std::sync::Arc;

use tauri::State;

use crate::api::types::ApiError;
use crate::protocols::host::BridgeHost;
use crate::runtime::bridge_host::TauriBridgeHost;
use crate::runtime::project_state::ProjectStateStore;

async fn project_state_restore_inner(
    store: &ProjectStateStore,
    host: &dyn BridgeHost,
) -> Result<bool, ApiError> {
    log::info!("project_state_restore called");
    store.import(host).await
}

/// Asks the UI for its project state and saves it.
///
/// # Returns
/// * `true` - state saved
/// * `false` - the UI did not answer in time, or saving failed
#[tauri::command]
#[specta::specta]
pub async fn project_state_save(
    store: State<'_, Arc<ProjectStateStore>>,
    host: State<'_, Arc<TauriBridgeHost>>,
) -> Result<bool, ApiError> {
    log::info!("project_state_save called");
    Ok(store.request_export(host.inner().as_ref()).await)
}

/// Posts the saved project state back to the UI.
///
/// # Returns
/// * `true` - state posted as `import_project_state`
/// * `false` - nothing saved yet
///
/// # Errors
/// * `ApiError::IoFailure` - state file unreadable or not JSON
#[tauri::command]
#[specta::specta]
pub async fn project_state_restore(
    store: State<'_, Arc<ProjectStateStore>>,
    host: State<'_, Arc<TauriBridgeHost>>,
) -> Result<bool, ApiError> {
    project_state_restore_inner(store.inner(), host.inner().as_ref()).await
}
