use crate::stages::{RepoFile, SourceRepo};
use anyhow::{bail, Context, Result};
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_BASE: &str = "https://api.github.com";

/// Connection settings for a GitHub repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token
    #[serde(default)]
    pub token: String,

    /// `owner/name`
    #[serde(default)]
    pub repo: String,

    /// Target branch; repository default when empty
    #[serde(default)]
    pub branch: Option<String>,

    /// Override for GitHub Enterprise or tests
    #[serde(default)]
    pub api_base: Option<String>,
}

impl GitHubConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.repo.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ExistingFile {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    commit: CommitInfo,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

/// Commits files one by one through the contents API
pub struct GitHubRepo {
    client: Client,
    config: GitHubConfig,
}

impl GitHubRepo {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        if !config.is_configured() {
            bail!("GitHub token and repo must both be set");
        }

        let client = Client::builder()
            .user_agent(concat!("studio-node/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building GitHub client")?;

        Ok(Self { client, config })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.config.api_base.as_deref().unwrap_or(API_BASE).trim_end_matches('/'),
            self.config.repo,
            path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("token {}", self.config.token))
            .header(header::ACCEPT, "application/vnd.github.v3+json")
    }

    /// Blob sha of an existing file, needed to overwrite it
    async fn existing_sha(&self, path: &str) -> Result<Option<String>> {
        let mut request = self.request(reqwest::Method::GET, &self.contents_url(path));
        if let Some(branch) = &self.config.branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("fetching {path} from GitHub"))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let existing: ExistingFile = response
                    .json()
                    .await
                    .with_context(|| format!("decoding contents of {path}"))?;
                Ok(Some(existing.sha))
            }
            status => bail!("GitHub GET {} failed: HTTP {}", path, status),
        }
    }

    async fn put_file(&self, file: &RepoFile, message: &str) -> Result<CommitInfo> {
        let sha = self.existing_sha(&file.path).await?;
        debug!("Committing {} (update: {})", file.path, sha.is_some());

        let body = PutContents {
            message,
            content: base64::engine::general_purpose::STANDARD.encode(file.content.as_bytes()),
            sha,
            branch: self.config.branch.as_deref(),
        };

        let response = self
            .request(reqwest::Method::PUT, &self.contents_url(&file.path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("committing {} to GitHub", file.path))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("GitHub PUT {} failed: HTTP {}: {}", file.path, status, text);
        }

        let put: PutResponse = response
            .json()
            .await
            .with_context(|| format!("decoding commit for {}", file.path))?;
        Ok(put.commit)
    }
}

#[async_trait::async_trait]
impl SourceRepo for GitHubRepo {
    fn name(&self) -> &str {
        "github"
    }

    async fn commit(&self, files: &[RepoFile], message: &str) -> Result<String> {
        let mut last = None;
        for file in files {
            last = Some(self.put_file(file, message).await?);
        }

        let commit = last.context("nothing to commit")?;
        let reference = commit.html_url.unwrap_or(commit.sha);
        info!("Committed {} files to {}: {}", files.len(), self.config.repo, reference);
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_token_and_repo() {
        assert!(GitHubRepo::new(GitHubConfig::default()).is_err());
    }

    #[test]
    fn test_contents_url() {
        let repo = GitHubRepo::new(GitHubConfig {
            token: "t".into(),
            repo: "studio/recordings".into(),
            branch: None,
            api_base: Some("http://localhost:9000/".into()),
        })
        .unwrap();
        assert_eq!(
            repo.contents_url("metadata/2024-03-01-s.json"),
            "http://localhost:9000/repos/studio/recordings/contents/metadata/2024-03-01-s.json"
        );
    }
}
