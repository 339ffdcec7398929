//! UpdateService - orchestrates self-update with progress reporting.
//!
//! An install runs the whole pipeline:
//! 1. Rejects the request if another install is running
//! 2. Resolves the release feed (repository, token) from payload and config
//! 3. Finds the newest published release with a matching asset
//! 4. Downloads it with percent progress posted to the UI
//! 5. Optionally hands the installer off right away
//!
//! `execute` is the separate handoff step for an installer that was
//! downloaded earlier.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::api::types::ApiError;
use crate::config::UpdateConfig;
use crate::protocols::envelope::{
    payload_str, payload_str_list, ProgressEnvelope, TYPE_UPDATE_PROGRESS,
};
use crate::protocols::host::BridgeHost;
use crate::updates::feed::default_asset_match;
use crate::updates::{download_to, launch_detached, ReleaseFeed};

/// `app_update_install` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallRequest {
    /// `owner/repo`; falls back to the configured repository
    pub repository: Option<String>,
    /// Asset name substring; falls back to config, then the platform default
    pub asset_match: Option<String>,
    /// Bearer token for the release feed; falls back to the token env var
    pub token: Option<String>,
    /// When present the installer is launched with these args after download
    pub args: Option<Vec<String>>,
}

impl InstallRequest {
    pub fn from_payload(payload: &Value) -> Self {
        let non_blank = |key: &str| {
            payload_str(payload, key)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            repository: non_blank("repository"),
            asset_match: non_blank("assetMatch").or_else(|| non_blank("asset_match")),
            token: non_blank("token"),
            args: payload_str_list(payload, "args"),
        }
    }
}

/// `app_update_execute` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteRequest {
    pub path: Option<String>,
    pub args: Vec<String>,
}

impl ExecuteRequest {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            path: payload_str(payload, "path").map(str::to_string),
            args: payload_str_list(payload, "args").unwrap_or_default(),
        }
    }
}

/// What a finished install produced.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub tag_name: String,
    pub asset_name: String,
    pub path: PathBuf,
    /// Installer pid when it was launched right after the download
    pub launched_pid: Option<u32>,
}

impl InstallOutcome {
    pub fn message(&self) -> String {
        match self.launched_pid {
            Some(_) => format!("Installer {} ({}) started", self.asset_name, self.tag_name),
            None => format!("Downloaded {} ({})", self.asset_name, self.tag_name),
        }
    }
}

/// Clears the in-progress flag when the install ends, however it ends.
pub struct InstallGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Orchestrator for self-update.
///
/// Injected via `app.manage(Arc::new(UpdateService::new(...)))` and shared
/// with the dispatcher.
pub struct UpdateService {
    client: reqwest::Client,
    config: UpdateConfig,
    temp_root: PathBuf,
    installing: AtomicBool,
}

impl UpdateService {
    pub fn new(config: UpdateConfig, temp_root: PathBuf) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::HttpFailure {
                status: None,
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            config,
            temp_root,
            installing: AtomicBool::new(false),
        })
    }

    /// Claim the single install slot.
    pub fn begin_install(&self) -> Result<InstallGuard<'_>, ApiError> {
        self.installing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ApiError::UpdateInProgress)?;
        Ok(InstallGuard {
            flag: &self.installing,
        })
    }

    /// Find, download and optionally launch the newest installer.
    ///
    /// Progress envelopes are posted to `host` as the install advances; the
    /// terminal result is left to the caller.
    pub async fn install(
        &self,
        host: &dyn BridgeHost,
        request: InstallRequest,
    ) -> Result<InstallOutcome, ApiError> {
        let _guard = self.begin_install()?;

        let repository = request
            .repository
            .or_else(|| self.config.repository.clone())
            .ok_or_else(|| ApiError::InvalidInput {
                message: "No update repository configured".to_string(),
            })?;
        let pattern = request
            .asset_match
            .or_else(|| self.config.asset_match.clone())
            .unwrap_or_else(|| default_asset_match().to_string());
        let token = request.token.or_else(|| self.token_from_env());

        log::info!(
            "Starting update install: repository={repository}, pattern={pattern}, authenticated={}",
            token.is_some()
        );

        host.post(ProgressEnvelope::message(TYPE_UPDATE_PROGRESS, "Checking for updates").into());

        let feed = ReleaseFeed::new(
            self.client.clone(),
            &self.config.api_base,
            &repository,
            token,
        )?;
        let (release, asset) = feed.find_asset(&pattern).await?;

        host.post(
            ProgressEnvelope::message(TYPE_UPDATE_PROGRESS, format!("Downloading {}", asset.name))
                .into(),
        );

        let path = download_to(&self.client, &asset.download_url, &self.temp_root, |progress| {
            if let Some(percent) = progress.percent {
                host.post(ProgressEnvelope::percent(TYPE_UPDATE_PROGRESS, percent).into());
            }
        })
        .await?;

        let launched_pid = match &request.args {
            Some(args) => Some(launch_detached(&path, args)?),
            None => None,
        };

        let outcome = InstallOutcome {
            tag_name: release.tag_name,
            asset_name: asset.name,
            path,
            launched_pid,
        };
        log::info!("Update install finished: {}", outcome.message());
        Ok(outcome)
    }

    /// Launch a previously downloaded installer.
    pub fn execute(&self, request: ExecuteRequest) -> Result<u32, ApiError> {
        match request.path {
            Some(path) if !path.trim().is_empty() => {
                launch_detached(&PathBuf::from(path), &request.args)
            }
            path => Err(ApiError::InvalidInstallerPath {
                path: path.unwrap_or_default(),
            }),
        }
    }

    fn token_from_env(&self) -> Option<String> {
        if self.config.token_env.is_empty() {
            return None;
        }
        std::env::var(&self.config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}
