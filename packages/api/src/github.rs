//! # GitHub commit publisher
//!
//! Persistence path for static deployments: the item database, the cover and uploaded
//! images are committed straight to a GitHub repository through the contents API, so
//! a GitHub Pages site picks them up on its next build.
//!
//! ## Flow per operation
//!
//! 1. Resolve `owner/repo`, branch (default `main`) and token from the local store,
//!    asking a [`CredentialPrompt`] for anything missing and saving the answer.
//! 2. `GET /repos/{repo}/contents/{path}?ref={branch}`. A 404 means the file does not
//!    exist yet; items then start from `{version: 1, items: []}`.
//! 3. `PUT` the new content as a single commit, passing the previous blob `sha` when
//!    the file existed.
//!
//! A 409 (or a 422 complaining about the sha) means someone else committed in between.
//! It is reported as [`ApiError::Conflict`] and never retried.
//!
//! | Operation | Path | Commit message |
//! |-----------|------|----------------|
//! | [`GithubPublisher::publish_item`] | `data/db.json` | `Publish {TYPE}: {title}` |
//! | [`GithubPublisher::update_cover`] | `data/cover.json` | `Update cover: Issue {n}` |
//! | [`GithubPublisher::upload_image`] | `assets/uploads/{millis}_{hex}_{name}.{ext}` | `Upload image: {file}` |

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{json, Value};

use store::config::{GithubConfig, SiteConfig};
use store::local::{GITHUB_BRANCH_KEY, GITHUB_REPO_KEY, GITHUB_TOKEN_KEY};
use store::{
    ids, media, Cover, CoverPayload, GithubCredentials, Item, ItemPayload, LocalStore,
    MergeCache, MergedView, Snapshot, StoreError, ValidationError,
};

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::ApiError;

pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Characters left unescaped in a path segment, matching `encodeURIComponent`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialField {
    /// `owner/repo`
    Repo,
    Branch,
    Token,
}

/// Asks the operator for a missing GitHub setting. `None` leaves it unset.
pub trait CredentialPrompt: Send + Sync {
    fn ask(&self, field: CredentialField) -> Option<String>;
}

/// Never answers; publishing fails with [`ApiError::Config`] until credentials are saved.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn ask(&self, _field: CredentialField) -> Option<String> {
        None
    }
}

struct RemoteFile {
    content: Vec<u8>,
    sha: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: String,
    sha: String,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct GithubPublisher {
    transport: Arc<dyn HttpTransport>,
    api: String,
    local: LocalStore,
    prompt: Arc<dyn CredentialPrompt>,
    cache: Arc<MergeCache>,
    db_path: String,
    cover_path: String,
    uploads_dir: String,
}

impl GithubPublisher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        github: &GithubConfig,
        site: &SiteConfig,
        local: LocalStore,
        prompt: Arc<dyn CredentialPrompt>,
        cache: Arc<MergeCache>,
    ) -> Self {
        Self {
            transport,
            api: github.api.trim_end_matches('/').to_string(),
            local,
            prompt,
            cache,
            db_path: site.db_path.trim_matches('/').to_string(),
            cover_path: site.cover_path.trim_matches('/').to_string(),
            uploads_dir: site.uploads_dir.trim_matches('/').to_string(),
        }
    }

    fn ask(&self, field: CredentialField, key: &str) -> Option<String> {
        let answer = self.prompt.ask(field)?.trim().to_string();
        if answer.is_empty() {
            return None;
        }
        if !self.local.set_setting(key, &answer).is_persisted() {
            tracing::warn!(?field, "GitHub setting saved for this session only");
        }
        Some(answer)
    }

    /// Saved credentials, completed through the prompt where missing.
    pub fn credentials(&self) -> Result<GithubCredentials, ApiError> {
        let mut creds = self.local.github_credentials();
        if creds.repo.is_empty() {
            if let Some(repo) = self.ask(CredentialField::Repo, GITHUB_REPO_KEY) {
                creds.repo = repo;
            }
        }
        if self.local.setting(GITHUB_BRANCH_KEY).is_none() {
            if let Some(branch) = self.ask(CredentialField::Branch, GITHUB_BRANCH_KEY) {
                creds.branch = branch;
            }
        }
        if creds.token.is_empty() {
            if let Some(token) = self.ask(CredentialField::Token, GITHUB_TOKEN_KEY) {
                creds.token = token;
            }
        }
        if creds.is_complete() {
            Ok(creds)
        } else {
            Err(ApiError::Config(
                "GitHub publishing needs a repository (owner/repo) and a token".to_string(),
            ))
        }
    }

    fn contents_url(&self, repo: &str, path: &str) -> String {
        let encoded: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}/repos/{}/contents/{}", self.api, repo, encoded.join("/"))
    }

    fn request(&self, method: Method, url: String, token: &str) -> HttpRequest {
        HttpRequest::new(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {token}"))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header("User-Agent", "cms-admin")
    }

    fn error_for(response: &HttpResponse) -> ApiError {
        let body: Option<Value> = serde_json::from_slice(&response.body).ok();
        let message = body
            .as_ref()
            .and_then(|v| v.get("message").or_else(|| v.get("error")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("GitHub API error: {}", response.status));
        match response.status {
            409 => ApiError::Conflict(message),
            422 if message.to_lowercase().contains("sha") => ApiError::Conflict(message),
            404 => ApiError::NotFound(message),
            status => ApiError::Server { status, message },
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.transport
            .send(request)
            .await
            .map_err(|e| ApiError::Network(e.to_string()))
    }

    async fn get_file(
        &self,
        creds: &GithubCredentials,
        path: &str,
    ) -> Result<Option<RemoteFile>, ApiError> {
        let url = format!(
            "{}?ref={}",
            self.contents_url(&creds.repo, path),
            utf8_percent_encode(&creds.branch, SEGMENT)
        );
        let response = self.send(self.request(Method::Get, url, &creds.token)).await?;
        if response.status == 404 {
            tracing::debug!(path, "not in the repository yet");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(Self::error_for(&response));
        }
        let parse_error = |message: String| ApiError::Parse {
            status: response.status,
            message,
        };
        let contents: ContentsResponse =
            serde_json::from_slice(&response.body).map_err(|e| parse_error(e.to_string()))?;
        let packed: String = contents
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let content = STANDARD
            .decode(packed)
            .map_err(|e| parse_error(e.to_string()))?;
        Ok(Some(RemoteFile {
            content,
            sha: contents.sha,
        }))
    }

    async fn put_file(
        &self,
        creds: &GithubCredentials,
        path: &str,
        content_base64: String,
        message: &str,
        sha: Option<String>,
    ) -> Result<(), ApiError> {
        let mut body = json!({
            "message": message,
            "content": content_base64,
            "branch": creds.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = Value::String(sha);
        }
        let request = self
            .request(Method::Put, self.contents_url(&creds.repo, path), &creds.token)
            .header("Content-Type", "application/json")
            .body(body.to_string().into_bytes());
        let response = self.send(request).await?;
        if !response.is_success() {
            let err = Self::error_for(&response);
            tracing::warn!(path, "GitHub commit rejected: {err}");
            return Err(err);
        }
        tracing::info!(path, "committed to {}@{}", creds.repo, creds.branch);
        Ok(())
    }

    /// Commit `payload` into the item database. An existing item with the same id is
    /// replaced; one of a different type is an error.
    pub async fn publish_item(&self, payload: ItemPayload) -> Result<Item, ApiError> {
        let creds = self.credentials()?;
        let now = Utc::now();

        let (mut db, sha) = match self.get_file(&creds, &self.db_path).await? {
            Some(file) => {
                let db = Snapshot::from_json(&file.content).map_err(|e| ApiError::Parse {
                    status: 200,
                    message: format!("{}: {e}", self.db_path),
                })?;
                (db, Some(file.sha))
            }
            None => (Snapshot::default(), None),
        };

        let existing = payload
            .id
            .as_ref()
            .and_then(|id| db.items.iter().position(|i| &i.id == id));
        let item = match existing {
            Some(index) => {
                let previous = db.items.remove(index);
                let existing_kind = previous.kind();
                if existing_kind != payload.kind() {
                    return Err(StoreError::TypeMismatch {
                        id: previous.id,
                        existing: existing_kind,
                        requested: payload.kind(),
                    }
                    .into());
                }
                payload.overwrite(&previous, now)
            }
            None => {
                let id = payload
                    .id
                    .clone()
                    .unwrap_or_else(|| ids::local_id(payload.kind(), now));
                payload.into_item(id, now)
            }
        };
        db.items.insert(0, item.clone());
        db.updated_at = Some(now);

        let json = db.to_json_pretty().map_err(|e| ApiError::Parse {
            status: 0,
            message: e.to_string(),
        })?;
        let title = if item.display_title().trim().is_empty() {
            item.id.as_str()
        } else {
            item.display_title()
        };
        let message = format!(
            "Publish {}: {}",
            item.kind().as_str().to_uppercase(),
            truncate_chars(title, 60)
        );
        self.put_file(&creds, &self.db_path, STANDARD.encode(json), &message, sha)
            .await?;

        if !self.local.clear_deleted(&item.id).is_persisted() {
            tracing::warn!(id = %item.id, "tombstone cleared for this session only");
        }
        let cover = match self.cache.last_remote_cover() {
            Some(cover) => cover,
            None => self.committed_cover(&creds).await,
        };
        self.cache.replace(MergedView::build(db, cover, &self.local));
        Ok(item)
    }

    /// The cover currently committed to the repository. Failures mean no cover.
    async fn committed_cover(&self, creds: &GithubCredentials) -> Option<Cover> {
        let file = match self.get_file(creds, &self.cover_path).await {
            Ok(file) => file?,
            Err(e) => {
                tracing::warn!("could not read {}: {e}", self.cover_path);
                return None;
            }
        };
        match serde_json::from_slice(&file.content) {
            Ok(cover) => Some(cover),
            Err(e) => {
                tracing::warn!("unreadable {}: {e}", self.cover_path);
                None
            }
        }
    }

    /// Overwrite the cover document.
    pub async fn update_cover(&self, payload: CoverPayload) -> Result<Cover, ApiError> {
        let creds = self.credentials()?;
        let sha = self
            .get_file(&creds, &self.cover_path)
            .await?
            .map(|file| file.sha);
        let cover = payload.into_cover(Utc::now());
        let json = serde_json::to_string_pretty(&cover).map_err(|e| ApiError::Parse {
            status: 0,
            message: e.to_string(),
        })?;
        let message = format!("Update cover: Issue {}", cover.issue_number);
        self.put_file(&creds, &self.cover_path, STANDARD.encode(json), &message, sha)
            .await?;
        self.cache.invalidate();
        Ok(cover)
    }

    /// Commit a `data:` URL image; returns its repo-relative path.
    pub async fn upload_image(&self, filename: &str, data_url: &str) -> Result<String, ApiError> {
        let parsed = media::parse_data_url(data_url).ok_or(ValidationError::InvalidImageData)?;
        let creds = self.credentials()?;
        let unique = media::unique_upload_name(
            Utc::now().timestamp_millis(),
            &ids::random_hex(8),
            &media::github_upload_base(filename),
            media::ext_for_mime(parsed.mime_type),
        );
        let path = format!("{}/{}", self.uploads_dir, unique);
        let message = format!("Upload image: {unique}");
        self.put_file(&creds, &path, parsed.base64.to_string(), &message, None)
            .await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use store::models::News;
    use store::{ItemBody, ItemKind};

    use super::*;
    use crate::transport::testing::{body_json, json as respond, ScriptedTransport};

    struct Answers(Mutex<Vec<(CredentialField, &'static str)>>);

    impl CredentialPrompt for Answers {
        fn ask(&self, field: CredentialField) -> Option<String> {
            let answers = self.0.lock().unwrap();
            answers
                .iter()
                .find(|(f, _)| *f == field)
                .map(|(_, v)| v.to_string())
        }
    }

    fn configured_store() -> LocalStore {
        let local = LocalStore::in_memory();
        let _ = local.set_github_credentials(&GithubCredentials {
            token: "ghp_test".into(),
            repo: "acme/mag".into(),
            branch: "main".into(),
        });
        local
    }

    fn github(
        transport: Arc<ScriptedTransport>,
        local: LocalStore,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> (GithubPublisher, Arc<MergeCache>) {
        let cache = Arc::new(MergeCache::default());
        let publisher = GithubPublisher::new(
            transport,
            &GithubConfig::default(),
            &SiteConfig::default(),
            local,
            prompt,
            cache.clone(),
        );
        (publisher, cache)
    }

    fn news(headline: &str) -> ItemPayload {
        ItemPayload::new(ItemBody::News(News {
            headline: headline.into(),
            ..Default::default()
        }))
    }

    fn contents(value: &Value, sha: &str) -> Result<HttpResponse, crate::transport::TransportError> {
        let encoded = STANDARD.encode(value.to_string());
        // GitHub wraps base64 at 60 columns
        let wrapped = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        respond(200, json!({"content": wrapped, "sha": sha}))
    }

    fn committed_db(request: &HttpRequest) -> Snapshot {
        let body = body_json(request);
        let raw = STANDARD.decode(body["content"].as_str().unwrap()).unwrap();
        Snapshot::from_json(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_first_publish_creates_database() {
        let transport = ScriptedTransport::new(|req| match req.method {
            Method::Get => respond(404, json!({"message": "Not Found"})),
            _ => respond(201, json!({"content": {}})),
        });
        let (publisher, cache) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));

        let item = publisher.publish_item(news("Fresh news")).await.unwrap();
        assert!(item.id.starts_with("news_"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2].url,
            "https://api.github.com/repos/acme/mag/contents/data/cover.json?ref=main"
        );
        assert_eq!(
            requests[0].url,
            "https://api.github.com/repos/acme/mag/contents/data/db.json?ref=main"
        );
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer ghp_test"));
        assert_eq!(
            requests[0].header_value("accept"),
            Some("application/vnd.github+json")
        );
        assert_eq!(
            requests[0].header_value("x-github-api-version"),
            Some(GITHUB_API_VERSION)
        );

        let put = body_json(&requests[1]);
        assert_eq!(put["message"], "Publish NEWS: Fresh news");
        assert_eq!(put["branch"], "main");
        assert!(put.get("sha").is_none());
        let db = committed_db(&requests[1]);
        assert_eq!(db.version, 1);
        assert_eq!(db.items, vec![item.clone()]);

        let view = cache.get_fresh().unwrap();
        assert_eq!(view.items[0].id, item.id);
    }

    #[tokio::test]
    async fn test_update_replaces_and_sends_sha() {
        let existing = json!({
            "version": 1,
            "items": [
                {"id": "news_1", "type": "news", "headline": "Old", "createdAt": "2024-01-01T00:00:00Z"},
                {"id": "critic_1", "type": "critic", "album": "LP"}
            ]
        });
        let transport = ScriptedTransport::new(move |req| match req.method {
            Method::Get => contents(&existing, "abc123"),
            _ => respond(200, json!({})),
        });
        let (publisher, _) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));

        let item = publisher
            .publish_item(news("New").with_id("news_1"))
            .await
            .unwrap();
        assert_eq!(item.created_at, store::models::parse_timestamp("2024-01-01"));

        let requests = transport.requests();
        assert_eq!(body_json(&requests[1])["sha"], "abc123");
        let db = committed_db(&requests[1]);
        let ids: Vec<_> = db.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["news_1", "critic_1"]);
        assert_eq!(db.items[0].display_title(), "New");
    }

    #[tokio::test]
    async fn test_rebuilt_view_keeps_remote_cover() {
        let remote = Cover {
            issue_number: "12".into(),
            ..Default::default()
        };
        let transport = ScriptedTransport::new(|req| match req.method {
            Method::Get => respond(404, json!({})),
            _ => respond(201, json!({})),
        });
        let (publisher, cache) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));
        cache.replace(MergedView::from_parts(
            Snapshot::default(),
            Some(remote.clone()),
            &[],
            None,
            &Default::default(),
        ));
        cache.invalidate();

        publisher.publish_item(news("x")).await.unwrap();
        assert_eq!(transport.count(), 2);
        assert_eq!(cache.get_fresh().unwrap().cover, Some(remote));
    }

    #[tokio::test]
    async fn test_publish_reads_committed_cover_when_none_known() {
        let cover = json!({"issueNumber": "4", "issueDate": "2024-05-01", "description": "May"});
        let transport = ScriptedTransport::new(move |req| match req.method {
            Method::Get if req.url.contains("cover.json") => contents(&cover, "c1"),
            Method::Get => respond(404, json!({})),
            _ => respond(201, json!({})),
        });
        let (publisher, cache) = github(transport, configured_store(), Arc::new(NoPrompt));

        publisher.publish_item(news("x")).await.unwrap();
        let view = cache.get_fresh().unwrap();
        assert_eq!(view.cover.as_ref().map(|c| c.issue_number.as_str()), Some("4"));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_not_committed() {
        let existing = json!({"version": 1, "items": [{"id": "critic_1", "type": "critic"}]});
        let transport = ScriptedTransport::new(move |_| contents(&existing, "abc"));
        let (publisher, _) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));

        let err = publisher
            .publish_item(news("x").with_id("critic_1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Store(StoreError::TypeMismatch {
                existing: ItemKind::Critic,
                ..
            })
        ));
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn test_sha_conflict_is_not_retried() {
        let transport = ScriptedTransport::new(|req| match req.method {
            Method::Get => contents(&json!({"version": 1, "items": []}), "stale"),
            _ => respond(409, json!({"message": "data/db.json does not match stale"})),
        });
        let (publisher, cache) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));

        let err = publisher.publish_item(news("x")).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(transport.count(), 2);
        assert!(cache.get_fresh().is_none());

        let unprocessable = ScriptedTransport::new(|req| match req.method {
            Method::Get => respond(404, json!({})),
            _ => respond(422, json!({"message": "Invalid request.\n\n\"sha\" wasn't supplied."})),
        });
        let (publisher, _) = github(unprocessable, configured_store(), Arc::new(NoPrompt));
        assert!(matches!(
            publisher.update_cover(CoverPayload::default()).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let transport = ScriptedTransport::new(|_| respond(200, json!({})));
        let (publisher, _) = github(transport.clone(), LocalStore::in_memory(), Arc::new(NoPrompt));
        assert!(matches!(
            publisher.publish_item(news("x")).await,
            Err(ApiError::Config(_))
        ));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_prompted_credentials_are_saved() {
        let local = LocalStore::in_memory();
        let prompt = Arc::new(Answers(Mutex::new(vec![
            (CredentialField::Repo, "acme/site"),
            (CredentialField::Token, "tok"),
        ])));
        let transport = ScriptedTransport::new(|_| respond(200, json!({})));
        let (publisher, _) = github(transport, local.clone(), prompt);

        let creds = publisher.credentials().unwrap();
        assert_eq!(creds.repo, "acme/site");
        assert_eq!(creds.branch, "main");
        assert_eq!(local.github_credentials().token, "tok");
    }

    #[tokio::test]
    async fn test_upload_image() {
        let transport = ScriptedTransport::new(|_| respond(201, json!({})));
        let (publisher, _) = github(transport.clone(), configured_store(), Arc::new(NoPrompt));

        let path = publisher
            .upload_image("Tour Poster.PNG", "data:image/png;base64,iVBORw0KGgo=")
            .await
            .unwrap();
        assert!(path.starts_with("assets/uploads/"));
        assert!(path.ends_with("_Tour_Poster.png"));

        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Put);
        assert!(request
            .url
            .starts_with("https://api.github.com/repos/acme/mag/contents/assets/uploads/"));
        let body = body_json(request);
        assert_eq!(body["content"], "iVBORw0KGgo=");
        assert!(body["message"].as_str().unwrap().starts_with("Upload image: "));

        assert!(matches!(
            publisher.upload_image("x.png", "not a data url").await,
            Err(ApiError::Validation(ValidationError::InvalidImageData))
        ));
    }
}
