//! Host configuration.
//!
//! Every setting has a default so the host runs without any file on disk.
//! Deployments override values with `<app_config_dir>/host.json`:
//!
//! ```json
//! {
//!   "update": { "repository": "owner/repo", "assetMatch": ".exe" },
//!   "bridge": { "fallback": "ifc_export" }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

/// File name of the optional configuration file
pub const CONFIG_FILE_NAME: &str = "host.json";

/// Root configuration object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub worker: WorkerConfig,
    pub tools: ToolsConfig,
    pub update: UpdateConfig,
    pub bridge: BridgeConfig,
    pub project_state: ProjectStateConfig,
}

/// Background worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Executable name without platform suffix
    pub executable: String,
    /// Time the worker gets to exit after a termination request
    pub graceful_stop_ms: u64,
    /// Time to wait for exit after a forced kill
    pub kill_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: "agent_api".to_string(),
            graceful_stop_ms: 100,
            kill_wait_ms: 3000,
        }
    }
}

/// Packaged command-line tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub ifc_exporter: String,
    pub analysis_cli: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ifc_exporter: "ifc_exporter".to_string(),
            analysis_cli: "wind_path_cli".to_string(),
        }
    }
}

/// Self-update feed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateConfig {
    /// `owner/repo` of the release feed
    pub repository: Option<String>,
    /// Asset name substring; platform installer extension when unset
    pub asset_match: Option<String>,
    pub api_base: String,
    /// Environment variable consulted for a bearer token
    pub token_env: String,
    pub user_agent: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repository: None,
            asset_match: None,
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            user_agent: concat!("bud-designer-host/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// What the dispatcher does with unrecognized or undecodable messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Reply with a `bridge_error` envelope
    #[default]
    Reject,
    /// Treat the message as an IFC export request
    IfcExport,
    /// Treat the message as an update install request
    UpdateInstall,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectStateConfig {
    pub export_timeout_ms: u64,
}

impl Default for ProjectStateConfig {
    fn default() -> Self {
        Self {
            export_timeout_ms: 2000,
        }
    }
}

impl HostConfig {
    /// Load `host.json` from the config directory, falling back to defaults.
    ///
    /// A missing file is normal. An unreadable or invalid file is logged and
    /// ignored so a bad override never keeps the host from starting.
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            log::debug!("No host config at {}, using defaults", path.display());
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HostConfig>(&content) {
                Ok(config) => {
                    log::info!("Loaded host config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {e}", path.display());
                Self::default()
            }
        }
    }
}
