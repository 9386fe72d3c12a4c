use anyhow::Result;
use octocrab::Octocrab;
use tracing::{debug, instrument, warn};

use super::client::build_octocrab;
use crate::config::StoreConfig;
use crate::store::{DocumentStore, StoreError, StoredDocument};

/// Tally document kept as a file in a GitHub repository, accessed through
/// the repository contents API
pub struct GitHubContentsStore {
    /// `None` when no token was configured
    client: Option<Octocrab>,
    owner: String,
    repo: String,
    path: String,
    branch: Option<String>,
}

impl GitHubContentsStore {
    pub fn new(config: &StoreConfig, token: Option<String>) -> Result<Self> {
        let client = match token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Some(build_octocrab(&token, config.api_url.trim_end_matches('/'))?),
            None => None,
        };

        Ok(Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            path: config.path.trim_start_matches('/').to_string(),
            branch: config.branch.clone(),
        })
    }

    pub fn has_credential(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&Octocrab, StoreError> {
        self.client.as_ref().ok_or(StoreError::MissingCredential)
    }
}

impl DocumentStore for GitHubContentsStore {
    fn path(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), fields(owner = %self.owner, repo = %self.repo, path = %self.path))]
    async fn fetch(&self) -> Result<Option<StoredDocument>, StoreError> {
        let repos = self.client()?.repos(&self.owner, &self.repo);

        let mut request = repos.get_content().path(&self.path);
        if let Some(branch) = &self.branch {
            request = request.r#ref(branch);
        }

        let items = match request.send().await {
            Ok(items) => items,
            Err(err) if github_status(&err) == Some(404) => {
                debug!("Tally document not found");
                return Ok(None);
            }
            Err(err) => return Err(store_error(err)),
        };

        let file = match items.items.as_slice() {
            [file] if file.r#type == "file" => file,
            _ => return Err(StoreError::Content(format!("{} is not a file", self.path))),
        };

        let content = file
            .decoded_content()
            .ok_or_else(|| StoreError::Content("file content is not base64 utf-8".to_string()))?;

        debug!(sha = %file.sha, bytes = content.len(), "Fetched tally document");

        Ok(Some(StoredDocument {
            content,
            sha: file.sha.clone(),
        }))
    }

    #[instrument(
        skip(self, content),
        fields(owner = %self.owner, repo = %self.repo, path = %self.path)
    )]
    async fn write(
        &self,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<(), StoreError> {
        let repos = self.client()?.repos(&self.owner, &self.repo);

        let mut request = match sha {
            Some(sha) => repos.update_file(&self.path, message, content, sha),
            None => repos.create_file(&self.path, message, content),
        };
        if let Some(branch) = &self.branch {
            request = request.branch(branch);
        }

        let err = match request.send().await {
            Ok(_) => {
                debug!("Wrote tally document");
                return Ok(());
            }
            Err(err) => err,
        };

        // A create racing another create is rejected with 422 instead of 409
        let status = github_status(&err);
        if status == Some(409) || (sha.is_none() && status == Some(422)) {
            warn!(status = ?status, "Write rejected, document changed since it was read");
            return Err(StoreError::Conflict {
                path: self.path.clone(),
            });
        }

        Err(store_error(err))
    }
}

/// HTTP status of an error response from the GitHub API
fn github_status(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

fn store_error(err: octocrab::Error) -> StoreError {
    match err {
        octocrab::Error::GitHub { source, .. } => StoreError::Status {
            status: source.status_code.as_u16(),
            message: source.message.clone(),
        },
        other => StoreError::Transport(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::VoteRecorder;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTENTS_PATH: &str = "/repos/octocat/votes/contents/votes.json";

    fn store_for(server: &MockServer, token: Option<&str>) -> GitHubContentsStore {
        let config = StoreConfig {
            owner: "octocat".to_string(),
            repo: "votes".to_string(),
            path: "votes.json".to_string(),
            branch: None,
            api_url: server.uri(),
        };
        GitHubContentsStore::new(&config, token.map(str::to_string)).unwrap()
    }

    fn entry_json(name: &str, kind: &str, sha: &str) -> Value {
        let url = format!("https://api.github.com/repos/octocat/votes/contents/{}", name);
        let git = format!("https://api.github.com/repos/octocat/votes/git/blobs/{}", sha);
        let html = format!("https://github.com/octocat/votes/blob/main/{}", name);
        let raw = format!("https://raw.githubusercontent.com/octocat/votes/main/{}", name);

        json!({
            "type": kind,
            "size": 0,
            "name": name,
            "path": name,
            "sha": sha,
            "url": url,
            "git_url": git,
            "html_url": html,
            "download_url": raw,
            "_links": { "self": url, "git": git, "html": html },
        })
    }

    /// Contents API file response, base64 wrapped the way GitHub sends it
    fn file_json(sha: &str, text: &str) -> Value {
        let encoded = STANDARD.encode(text);
        let wrapped = encoded
            .as_bytes()
            .chunks(8)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        let mut body = entry_json("votes.json", "file", sha);
        body["size"] = json!(text.len());
        body["encoding"] = json!("base64");
        body["content"] = json!(format!("{}\n", wrapped));
        body
    }

    fn update_json(sha: &str) -> Value {
        let commit_url = "https://api.github.com/repos/octocat/votes/git/commits/7638417db6d5";
        let person = json!({
            "date": "2024-11-07T22:01:45Z",
            "name": "Monalisa Octocat",
            "email": "octocat@github.com",
        });

        json!({
            "content": entry_json("votes.json", "file", sha),
            "commit": {
                "sha": "7638417db6d59f3c431d3e1f261cc637155684cd",
                "node_id": "MDY6Q29tbWl0NzYzODQxN2RiNmQ1OWYzYzQzMWQzZTFmMjYxY2M2MzcxNTU2ODRjZA==",
                "url": commit_url,
                "html_url": "https://github.com/octocat/votes/git/commit/7638417db6d5",
                "author": person,
                "committer": person,
                "message": "Updated vote",
                "tree": {
                    "url": "https://api.github.com/repos/octocat/votes/git/trees/691272480426",
                    "sha": "691272480426f78a0138979dd3ce63b77f706feb",
                },
                "parents": [{
                    "url": commit_url,
                    "html_url": "https://github.com/octocat/votes/git/commit/1acc419d4d6a",
                    "sha": "1acc419d4d6a9ce985db7be48c6349a0475975b5",
                }],
                "verification": {
                    "verified": false,
                    "reason": "unsigned",
                    "signature": null,
                    "payload": null,
                },
            },
        })
    }

    #[tokio::test]
    async fn test_fetch_decodes_wrapped_base64() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(file_json("abc123", "{\n  \"photo-1\": 2\n}")),
            )
            .mount(&server)
            .await;

        let doc = store_for(&server, Some("secret"))
            .fetch()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc.sha, "abc123");
        assert_eq!(doc.content, "{\n  \"photo-1\": 2\n}");
    }

    #[tokio::test]
    async fn test_fetch_passes_branch_as_ref() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .and(query_param("ref", "tallies"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = store_for(&server, Some("secret"));
        store.branch = Some("tallies".to_string());

        assert!(store.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let doc = store_for(&server, Some("secret")).fetch().await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_fetch_unauthorized_is_status_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
            )
            .mount(&server)
            .await;

        let err = store_for(&server, Some("wrong")).fetch().await.unwrap_err();
        match err {
            StoreError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_directory_is_content_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                entry_json("a.json", "file", "s1"),
                entry_json("b.json", "file", "s2"),
            ])))
            .mount(&server)
            .await;

        let err = store_for(&server, Some("secret")).fetch().await.unwrap_err();
        assert!(matches!(err, StoreError::Content(_)));
    }

    #[tokio::test]
    async fn test_missing_token_makes_no_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = store_for(&server, Some("  "));
        assert!(!store.has_credential());

        let err = store.fetch().await.unwrap_err();
        assert!(matches!(err, StoreError::MissingCredential));
    }

    #[tokio::test]
    async fn test_write_sends_sha_and_encoded_content() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({
                "message": "Updated vote for photo-1 (attempt 1)",
                "content": STANDARD.encode("{}"),
                "sha": "abc123",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(update_json("def456")))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server, Some("secret"))
            .write("{}", Some("abc123"), "Updated vote for photo-1 (attempt 1)")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_passes_branch() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({"branch": "tallies"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(update_json("def456")))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = store_for(&server, Some("secret"));
        store.branch = Some("tallies".to_string());

        store.write("{}", None, "create").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "votes.json does not match abc123"
            })))
            .mount(&server)
            .await;

        let err = store_for(&server, Some("secret"))
            .write("{}", Some("abc123"), "update")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_race_is_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Invalid request.\n\n\"sha\" wasn't supplied."
            })))
            .mount(&server)
            .await;

        let store = store_for(&server, Some("secret"));

        let err = store.write("{}", None, "create").await.unwrap_err();
        assert!(err.is_conflict());

        // With a sha presented a 422 is a plain failure
        let err = store.write("{}", Some("abc"), "update").await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn test_write_forbidden() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "Resource not accessible by personal access token"
            })))
            .mount(&server)
            .await;

        let err = store_for(&server, Some("secret"))
            .write("{}", Some("abc123"), "update")
            .await
            .unwrap_err();

        match err {
            StoreError::Status { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Resource not accessible by personal access token");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recorder_refetches_after_conflict() {
        let server = MockServer::start().await;

        // First read sees sha "a"; a rival then bumps photo-1 to sha "b"
        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(file_json("a", "{\n  \"photo-1\": 1\n}")),
            )
            .with_priority(1)
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(file_json("b", "{\n  \"photo-1\": 2\n}")),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({"sha": "a"})))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "votes.json does not match a"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({
                "sha": "b",
                "message": "Updated vote for photo-1 (attempt 2)",
                "content": STANDARD.encode("{\n  \"photo-1\": 3\n}"),
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(update_json("c")))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = VoteRecorder::new(store_for(&server, Some("secret")));
        let recorded = recorder.record("photo-1").await.unwrap();

        assert_eq!(recorded.attempts, 2);
        assert_eq!(recorded.votes, 3);
        assert!(!recorded.created_document);
    }
}
