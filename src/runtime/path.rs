//! Filesystem locations used by the host.
//!
//! - `HostPaths`: install, data, temp and error-log directories resolved once at startup
//! - `ScratchDir`: per-invocation temp directory removed on drop

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::api::types::ApiError;

/// Application name used for the per-user data directory
pub const APP_NAME: &str = "BUD Sustainable Building Designer";

/// Project state file, relative to the data directory
pub const STATE_FILE_RELATIVE: &str = "state/wind_analysis_state.json";

/// Resolved directories the host reads from and writes to.
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// Directory containing the host executable and the packaged tools
    pub install_dir: PathBuf,
    /// `<user-data-dir>/<app-name>`
    pub data_dir: PathBuf,
    /// Root for scratch directories and update downloads
    pub temp_root: PathBuf,
    /// Where failed IFC exports leave their error log
    pub error_log_dir: PathBuf,
    /// Starting directory of save dialogs
    pub documents_dir: Option<PathBuf>,
}

impl HostPaths {
    /// Path of an executable that ships next to the host binary.
    pub fn executable(&self, name: &str) -> PathBuf {
        self.install_dir
            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE_RELATIVE)
    }
}

/// Local-time stamp used in generated file names (`yyyyMMdd_HHmmss`).
pub fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Directory of the running executable.
pub fn current_install_dir() -> Result<PathBuf, ApiError> {
    let exe = std::env::current_exe().map_err(|e| ApiError::IoFailure {
        message: format!("Failed to resolve current executable: {e}"),
    })?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ApiError::IoFailure {
            message: format!("Executable has no parent directory: {}", exe.display()),
        })
}

/// Unique temp directory for one tool invocation or download.
///
/// Created as `<root>/<scope>/<uuid>`. The directory and everything in it is
/// removed when the value is dropped; removal failures are logged only.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    keep: bool,
}

impl ScratchDir {
    pub fn create(root: &Path, scope: &str) -> Result<Self, ApiError> {
        let path = root.join(scope).join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path).map_err(|e| ApiError::IoFailure {
            message: format!("Failed to create temp directory {}: {e}", path.display()),
        })?;
        log::debug!("Created scratch dir: {}", path.display());
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Serialize `value` into `<dir>/<name>` as UTF-8 without BOM.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ApiError> {
        let target = self.join(name);
        let content = serde_json::to_vec(value).map_err(|e| ApiError::IoFailure {
            message: format!("Failed to serialize {name}: {e}"),
        })?;
        std::fs::write(&target, content).map_err(|e| ApiError::IoFailure {
            message: format!("Failed to write {}: {e}", target.display()),
        })?;
        Ok(target)
    }

    /// Leave the directory on disk after drop and return its path.
    ///
    /// Used for downloaded installers which must outlive the download task.
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove scratch dir {}: {e}", self.path.display());
            }
        } else {
            log::debug!("Removed scratch dir: {}", self.path.display());
        }
    }
}
