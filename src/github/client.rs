use anyhow::{Context, Result};
use octocrab::Octocrab;
use tracing::{debug, info};

/// GitHub API client for checking the tally repository
pub struct GitHubClient {
    client: Octocrab,
}

/// What the configured credential can do in the tally repository
#[derive(Debug, Clone)]
pub struct RepoAccess {
    pub full_name: String,
    pub default_branch: Option<String>,
    pub can_push: bool,
}

impl GitHubClient {
    /// Create a new GitHub client with the given token
    pub fn new(token: &str, api_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_octocrab(token, api_url)?,
        })
    }

    /// Look up the repository and the credential's permissions on it
    pub async fn verify_access(&self, owner: &str, repo: &str) -> Result<RepoAccess> {
        info!(owner, repo, "Checking repository access");

        let repository = self
            .client
            .repos(owner, repo)
            .get()
            .await
            .with_context(|| format!("Failed to look up repository {}/{}", owner, repo))?;

        let can_push = repository
            .permissions
            .as_ref()
            .map(|p| p.push)
            .unwrap_or(false);

        let access = RepoAccess {
            full_name: repository
                .full_name
                .unwrap_or_else(|| format!("{}/{}", owner, repo)),
            default_branch: repository.default_branch,
            can_push,
        };

        debug!(?access, "Repository access");

        Ok(access)
    }
}

/// Octocrab authenticated with `token` against `api_url`
pub fn build_octocrab(token: &str, api_url: &str) -> Result<Octocrab> {
    Octocrab::builder()
        .personal_token(token.to_string())
        .base_uri(api_url)
        .context("Invalid GitHub API URL")?
        .build()
        .context("Failed to create GitHub client")
}

/// Parse owner and repo from a repo string like "owner/repo"
pub fn parse_repo(repo: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = repo.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("Invalid repo format. Expected 'owner/repo', got: {}", repo);
    }
    Ok((parts[0], parts[1]))
}
