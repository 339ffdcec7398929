//! Release discovery against the GitHub releases REST API.
//!
//! Metadata is fetched fresh on every check; nothing is cached.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::api::types::ApiError;

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseMetadata {
    /// Drafts and prereleases are never offered as updates.
    pub fn is_published(&self) -> bool {
        !self.draft && !self.prerelease
    }
}

/// Installer extension for the running platform.
pub fn default_asset_match() -> &'static str {
    if cfg!(target_os = "windows") {
        ".exe"
    } else if cfg!(target_os = "macos") {
        ".dmg"
    } else {
        ".AppImage"
    }
}

/// First asset whose name contains `pattern`.
pub fn select_asset<'a>(release: &'a ReleaseMetadata, pattern: &str) -> Option<&'a ReleaseAsset> {
    release.assets.iter().find(|asset| asset.name.contains(pattern))
}

/// Check that a repository is given as `owner/repo`.
pub fn validate_repository(repository: &str) -> Result<(), ApiError> {
    let mut parts = repository.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.trim().is_empty() && !repo.trim().is_empty() => {
            Ok(())
        }
        _ => Err(ApiError::InvalidInput {
            message: format!("Invalid repository '{repository}', expected owner/repo"),
        }),
    }
}

/// Release feed of one repository.
pub struct ReleaseFeed {
    client: reqwest::Client,
    api_base: String,
    repository: String,
    token: Option<String>,
}

impl ReleaseFeed {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        repository: &str,
        token: Option<String>,
    ) -> Result<Self, ApiError> {
        validate_repository(repository)?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// `GET /repos/{owner}/{repo}/releases/latest`
    pub async fn latest(&self) -> Result<ReleaseMetadata, ApiError> {
        self.get_json(&format!(
            "{}/repos/{}/releases/latest",
            self.api_base, self.repository
        ))
        .await
    }

    /// `GET /repos/{owner}/{repo}/releases`, newest first.
    pub async fn list(&self) -> Result<Vec<ReleaseMetadata>, ApiError> {
        self.get_json(&format!("{}/repos/{}/releases", self.api_base, self.repository))
            .await
    }

    /// Find the newest published release with an asset matching `pattern`.
    ///
    /// The latest-release endpoint is tried first. If that fails, returns a
    /// draft/prerelease, or has no matching asset, the full release list is
    /// scanned instead.
    pub async fn find_asset(
        &self,
        pattern: &str,
    ) -> Result<(ReleaseMetadata, ReleaseAsset), ApiError> {
        match self.latest().await {
            Ok(release) if release.is_published() => {
                if let Some(asset) = select_asset(&release, pattern).cloned() {
                    log::info!(
                        "Latest release {} has asset {}",
                        release.tag_name,
                        asset.name
                    );
                    return Ok((release, asset));
                }
                log::info!(
                    "Latest release {} has no asset matching '{pattern}', scanning release list",
                    release.tag_name
                );
            }
            Ok(release) => log::info!(
                "Latest release {} is a draft or prerelease, scanning release list",
                release.tag_name
            ),
            Err(e) => log::warn!("Latest release lookup failed, scanning release list: {e}"),
        }

        let releases = self.list().await?;
        releases
            .into_iter()
            .filter(ReleaseMetadata::is_published)
            .find_map(|release| {
                select_asset(&release, pattern)
                    .cloned()
                    .map(|asset| (release, asset))
            })
            .ok_or_else(|| ApiError::NoMatchingAsset {
                pattern: pattern.to_string(),
            })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        log::debug!("Fetching release metadata: {url}");

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_GITHUB_JSON);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ApiError::HttpFailure {
            status: None,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpFailure {
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        response.json::<T>().await.map_err(|e| ApiError::HttpFailure {
            status: Some(status.as_u16()),
            message: format!("Invalid release metadata: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::testing::{serve, TestRoute};
    use serde_json::json;

    const REPO: &str = "acme/designer";

    fn release(tag: &str, draft: bool, assets: &[&str]) -> serde_json::Value {
        json!({
            "tag_name": tag,
            "draft": draft,
            "prerelease": false,
            "assets": assets.iter().map(|name| json!({
                "name": name,
                "browser_download_url": format!("https://example.invalid/{tag}/{name}"),
                "size": 10
            })).collect::<Vec<_>>()
        })
    }

    fn feed(base: &str) -> ReleaseFeed {
        ReleaseFeed::new(reqwest::Client::new(), base, REPO, None).unwrap()
    }

    #[test]
    fn test_select_asset_by_substring() {
        let release: ReleaseMetadata =
            serde_json::from_value(release("v1", false, &["tool.zip", "tool.exe"])).unwrap();
        assert_eq!(select_asset(&release, ".exe").unwrap().name, "tool.exe");
        assert!(select_asset(&release, ".dmg").is_none());
    }

    #[test]
    fn test_validate_repository() {
        assert!(validate_repository("acme/designer").is_ok());
        assert!(validate_repository("acme").is_err());
        assert!(validate_repository("acme/designer/extra").is_err());
        assert!(validate_repository("/designer").is_err());
    }

    #[tokio::test]
    async fn test_latest_release_with_match() {
        let base = serve(vec![TestRoute::json(
            "/repos/acme/designer/releases/latest",
            release("v2.0.0", false, &["tool.zip", "tool.exe"]),
        )])
        .await;

        let (release, asset) = feed(&base).find_asset(".exe").await.unwrap();
        assert_eq!(release.tag_name, "v2.0.0");
        assert_eq!(asset.name, "tool.exe");
        assert_eq!(asset.download_url, "https://example.invalid/v2.0.0/tool.exe");
    }

    #[tokio::test]
    async fn test_draft_latest_falls_through_to_list() {
        let base = serve(vec![
            TestRoute::json(
                "/repos/acme/designer/releases/latest",
                release("v3.0.0-draft", true, &["tool.exe"]),
            ),
            TestRoute::json(
                "/repos/acme/designer/releases",
                json!([
                    release("v3.0.0-draft", true, &["tool.exe"]),
                    release("v2.1.0", false, &["notes.txt"]),
                    release("v2.0.0", false, &["tool.exe"]),
                ]),
            ),
        ])
        .await;

        let (release, asset) = feed(&base).find_asset(".exe").await.unwrap();
        assert_eq!(release.tag_name, "v2.0.0");
        assert_eq!(asset.name, "tool.exe");
    }

    #[tokio::test]
    async fn test_failed_latest_falls_through_to_list() {
        let base = serve(vec![
            TestRoute::status("/repos/acme/designer/releases/latest", 404),
            TestRoute::json(
                "/repos/acme/designer/releases",
                json!([release("v1.0.0", false, &["setup.exe"])]),
            ),
        ])
        .await;

        let (_, asset) = feed(&base).find_asset(".exe").await.unwrap();
        assert_eq!(asset.name, "setup.exe");
    }

    #[tokio::test]
    async fn test_no_match_anywhere() {
        let base = serve(vec![
            TestRoute::json(
                "/repos/acme/designer/releases/latest",
                release("v1.0.0", false, &["tool.zip"]),
            ),
            TestRoute::json(
                "/repos/acme/designer/releases",
                json!([release("v1.0.0", false, &["tool.zip"])]),
            ),
        ])
        .await;

        match feed(&base).find_asset(".exe").await {
            Err(ApiError::NoMatchingAsset { pattern }) => assert_eq!(pattern, ".exe"),
            other => panic!("Expected NoMatchingAsset, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_failure_carries_status() {
        let base = serve(vec![TestRoute::status("/repos/acme/designer/releases", 403)]).await;

        match feed(&base).find_asset(".exe").await {
            Err(ApiError::HttpFailure { status, .. }) => assert_eq!(status, Some(403)),
            other => panic!("Expected HttpFailure, got {other:?}"),
        }
    }
}
