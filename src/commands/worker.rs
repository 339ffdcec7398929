//! Background worker commands.

use std::sync::Arc;

use tauri::State;

use crate::api::types::{ApiError, ProcessHandle};
use crate::runtime::worker::WorkerSupervisor;

/// Snapshot of the supervised background worker.
///
/// # Returns
/// * `Some(ProcessHandle)` - worker was started; `exited` tells whether it is still alive
/// * `None` - worker not installed or already stopped
#[tauri::command]
#[specta::specta]
pub async fn worker_status(
    supervisor: State<'_, Arc<WorkerSupervisor>>,
) -> Result<Option<ProcessHandle>, ApiError> {
    Ok(supervisor.status().await)
}
