//! # Client context
//!
//! [`ClientContext`] is the one object an admin front end talks to. It owns the request
//! queue, backend detector, merge cache and activity log for a session, and routes every
//! operation to one of three persistence paths:
//!
//! | [`Mode`] | When | Writes go to | Reads come from |
//! |----------|------|--------------|-----------------|
//! | `Backend` | `GET {api}/health` answered | [`ApiClient`] | [`ApiClient`] |
//! | `Github` | no backend, `github.enabled` | [`GithubPublisher`] (items, cover, images) and the local store (deletions) | merged view |
//! | `Local` | otherwise | [`LocalStore`] | merged view |
//!
//! Payloads are validated before anything is queued. Every failure is appended to the
//! [`ActivityLog`] before it is returned.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use store::models::sort_by_published_desc;
use store::{
    media, CmsConfig, Cover, CoverPayload, Durability, Item, ItemKind, ItemPayload, LocalBackup,
    LocalStore, MergeCache, MergedView, Stats, StoreError, ValidationError,
};

use crate::activity_log::ActivityLog;
use crate::client::ApiClient;
use crate::detector::BackendDetector;
use crate::github::{CredentialPrompt, GithubPublisher, NoPrompt};
use crate::queue::RequestQueue;
use crate::site::SnapshotSource;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Backend,
    Github,
    Local,
}

struct Inner {
    github_enabled: bool,
    local: LocalStore,
    log: ActivityLog,
    detector: BackendDetector,
    client: ApiClient,
    site: SnapshotSource,
    github: GithubPublisher,
    cache: Arc<MergeCache>,
}

impl Inner {
    async fn mode(&self) -> Mode {
        if self.detector.has_backend().await {
            Mode::Backend
        } else if self.github_enabled {
            Mode::Github
        } else {
            Mode::Local
        }
    }

    async fn merged_view(&self) -> Arc<MergedView> {
        if let Some(view) = self.cache.get_fresh() {
            return view;
        }
        let snapshot = self.site.snapshot().await;
        let cover = self.site.cover().await;
        self.cache
            .replace(MergedView::build(snapshot, cover, &self.local))
    }

    /// A local write may shadow a remote item of the same type, never one of another.
    /// Shadowing keeps the remote `createdAt`.
    async fn check_remote(&self, mut payload: ItemPayload) -> Result<ItemPayload, ApiError> {
        let Some(id) = payload.id.clone() else {
            return Ok(payload);
        };
        let view = self.merged_view().await;
        if let Some(current) = view.items.iter().find(|i| i.id == id) {
            if current.kind() != payload.kind() {
                return Err(StoreError::TypeMismatch {
                    id,
                    existing: current.kind(),
                    requested: payload.kind(),
                }
                .into());
            }
            if current.created_at.is_some() {
                payload.created_at = current.created_at;
            }
        }
        Ok(payload)
    }

    /// Drop the cached view and tell the admin when a local write did not stick.
    fn after_local_write(&self, durability: Durability) {
        self.cache.invalidate();
        if !durability.is_persisted() {
            self.log
                .warning("Local storage unavailable or full; change kept for this session only");
        }
    }

    async fn all_from_backend(&self) -> Vec<Item> {
        let mut items = Vec::new();
        for kind in ItemKind::ALL {
            match self.client.list(kind).await {
                Ok(mut listed) => items.append(&mut listed),
                Err(e) => {
                    tracing::warn!(%kind, "listing failed, treating as empty: {e}");
                }
            }
        }
        sort_by_published_desc(&mut items);
        items
    }
}

/// Per-session client state. Build one per admin session; clones of the queue and
/// cache are not shared between contexts.
pub struct ClientContext {
    inner: Arc<Inner>,
    queue: RequestQueue,
}

impl ClientContext {
    /// Must be called inside a tokio runtime: the request queue worker is spawned here.
    pub fn new(
        config: CmsConfig,
        local: LocalStore,
        transport: Arc<dyn HttpTransport>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Self {
        let log = ActivityLog::new();
        let base = local
            .api_base()
            .unwrap_or_else(|| config.api.base.trim_end_matches('/').to_string());
        let cache = Arc::new(MergeCache::new(config.site.cache_ttl()));

        let inner = Inner {
            github_enabled: config.github.enabled,
            detector: BackendDetector::new(
                transport.clone(),
                base.clone(),
                config.detector.timeout(),
            ),
            client: ApiClient::new(
                transport.clone(),
                base,
                config.retry.clone(),
                local.clone(),
                log.clone(),
            ),
            site: SnapshotSource::new(transport.clone(), &config.site),
            github: GithubPublisher::new(
                transport,
                &config.github,
                &config.site,
                local.clone(),
                prompt,
                cache.clone(),
            ),
            local,
            log,
            cache,
        };
        Self {
            inner: Arc::new(inner),
            queue: RequestQueue::new(config.queue.delay()),
        }
    }

    /// Production wiring: reqwest transport, no interactive credential prompt.
    pub fn connect(config: CmsConfig, local: LocalStore) -> Self {
        Self::new(
            config,
            local,
            Arc::new(ReqwestTransport::new()),
            Arc::new(NoPrompt),
        )
    }

    pub fn log(&self) -> &ActivityLog {
        &self.inner.log
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub async fn mode(&self) -> Mode {
        self.inner.mode().await
    }

    fn fail<T>(&self, action: &str, err: ApiError) -> Result<T, ApiError> {
        self.inner.log.error(format!("{action}: {err}"));
        Err(err)
    }

    /// Run `op` on the queue and log its failure.
    async fn run<T, F, Fut>(&self, action: &str, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        match self.queue.enqueue(move || op(inner)).await {
            Ok(value) => Ok(value),
            Err(e) => self.fail(action, e),
        }
    }

    pub async fn publish(&self, payload: ItemPayload) -> Result<Item, ApiError> {
        if let Err(e) = payload.validate() {
            return self.fail("Publish", e.into());
        }
        let item = self
            .run("Publish", move |inner| async move {
                match inner.mode().await {
                    Mode::Backend => inner.client.publish(&payload).await,
                    Mode::Github => inner.github.publish_item(payload).await,
                    Mode::Local => {
                        let payload = inner.check_remote(payload).await?;
                        let (item, durability) = inner.local.publish(payload, Utc::now())?;
                        inner.after_local_write(durability);
                        Ok(item)
                    }
                }
            })
            .await?;
        self.inner.log.success(format!(
            "Published {} \"{}\" ({})",
            item.kind(),
            item.display_title(),
            item.id
        ));
        Ok(item)
    }

    /// Full overwrite of an existing item; `payload.id` is required.
    pub async fn update(&self, payload: ItemPayload) -> Result<Item, ApiError> {
        if let Err(e) = payload.validate() {
            return self.fail("Update", e.into());
        }
        if payload.id.is_none() {
            return self.fail("Update", StoreError::MissingId.into());
        }
        let item = self
            .run("Update", move |inner| async move {
                match inner.mode().await {
                    Mode::Backend => inner.client.update(&payload).await,
                    Mode::Github => inner.github.publish_item(payload).await,
                    Mode::Local => {
                        let payload = inner.check_remote(payload).await?;
                        let (item, durability) = inner.local.update(payload, Utc::now())?;
                        inner.after_local_write(durability);
                        Ok(item)
                    }
                }
            })
            .await?;
        self.inner.log.success(format!("Updated {} {}", item.kind(), item.id));
        Ok(item)
    }

    /// Returns how many items were removed (or hidden, without a backend).
    pub async fn delete(&self, kind: ItemKind, id: &str) -> Result<usize, ApiError> {
        let id = id.to_string();
        let deleted = self
            .run("Delete", move |inner| async move {
                match inner.mode().await {
                    Mode::Backend => inner.client.delete(kind, &id).await,
                    Mode::Github | Mode::Local => {
                        inner.after_local_write(inner.local.delete(&id));
                        Ok(1)
                    }
                }
            })
            .await?;
        self.inner.log.success(format!("Deleted {kind} ({deleted})"));
        Ok(deleted)
    }

    pub async fn delete_demo(&self) -> Result<usize, ApiError> {
        let deleted = self
            .run("Delete demo content", |inner| async move {
                match inner.mode().await {
                    Mode::Backend => inner.client.delete_demo().await,
                    Mode::Github | Mode::Local => {
                        let view = inner.merged_view().await;
                        let (count, durability) = inner.local.delete_demo(view.demo_ids());
                        inner.after_local_write(durability);
                        Ok(count)
                    }
                }
            })
            .await?;
        self.inner.log.success(format!("Removed {deleted} demo items"));
        Ok(deleted)
    }

    pub async fn list(&self, kind: ItemKind) -> Result<Vec<Item>, ApiError> {
        self.run("List", move |inner| async move {
            match inner.mode().await {
                Mode::Backend => inner.client.list(kind).await,
                _ => Ok(inner.merged_view().await.list(kind)),
            }
        })
        .await
    }

    pub async fn item(&self, kind: ItemKind, id: &str) -> Result<Option<Item>, ApiError> {
        let id = id.to_string();
        self.run("Load item", move |inner| async move {
            match inner.mode().await {
                Mode::Backend => inner.client.item(kind, &id).await,
                _ => Ok(inner.merged_view().await.get(kind, &id).cloned()),
            }
        })
        .await
    }

    pub async fn latest(&self, limit: usize) -> Result<Vec<Item>, ApiError> {
        self.run("Load latest", move |inner| async move {
            match inner.mode().await {
                Mode::Backend => inner.client.latest(limit).await,
                _ => Ok(inner.merged_view().await.latest(limit)),
            }
        })
        .await
    }

    /// Every item of every type, newest first. With a backend, a type whose listing
    /// fails contributes nothing.
    pub async fn all_items(&self) -> Result<Vec<Item>, ApiError> {
        self.run("Load all items", |inner| async move {
            match inner.mode().await {
                Mode::Backend => Ok(inner.all_from_backend().await),
                _ => Ok(inner.merged_view().await.all_items()),
            }
        })
        .await
    }

    pub async fn cover(&self) -> Result<Option<Cover>, ApiError> {
        self.run("Load cover", |inner| async move {
            match inner.mode().await {
                Mode::Backend => inner.client.cover().await,
                _ => Ok(inner.merged_view().await.cover.clone()),
            }
        })
        .await
    }

    pub async fn update_cover(&self, payload: CoverPayload) -> Result<Cover, ApiError> {
        if let Err(e) = payload.validate() {
            return self.fail("Update cover", e.into());
        }
        let cover = self
            .run("Update cover", move |inner| async move {
                match inner.mode().await {
                    Mode::Backend => inner.client.update_cover(&payload).await,
                    Mode::Github => inner.github.update_cover(payload).await,
                    Mode::Local => {
                        let (cover, durability) = inner.local.update_cover(payload, Utc::now());
                        inner.after_local_write(durability);
                        Ok(cover)
                    }
                }
            })
            .await?;
        self.inner
            .log
            .success(format!("Cover updated: Issue {}", cover.issue_number));
        Ok(cover)
    }

    /// Store an image given as a `data:` URL and return the URL to reference it by.
    /// Without a backend or GitHub the data URL itself is returned.
    pub async fn upload_image(&self, filename: &str, data_url: &str) -> Result<String, ApiError> {
        let Some(mime_type) = media::parse_data_url(data_url).map(|d| d.mime_type.to_string())
        else {
            return self.fail("Upload image", ValidationError::InvalidImageData.into());
        };
        let filename = filename.to_string();
        let data_url = data_url.to_string();
        self.run("Upload image", move |inner| async move {
            match inner.mode().await {
                Mode::Backend => {
                    inner
                        .client
                        .upload_image(&filename, &data_url, &mime_type)
                        .await
                }
                Mode::Github => inner.github.upload_image(&filename, &data_url).await,
                Mode::Local => Ok(data_url),
            }
        })
        .await
    }

    pub async fn stats(&self, demo_only: bool) -> Result<Stats, ApiError> {
        self.run("Load stats", move |inner| async move {
            match inner.mode().await {
                Mode::Backend => inner.client.stats(demo_only).await,
                _ => Ok(inner.merged_view().await.stats(demo_only)),
            }
        })
        .await
    }

    /// The merged snapshot + local view, fetched through the queue when stale.
    pub async fn merged_view(&self) -> Result<Arc<MergedView>, ApiError> {
        self.run("Load snapshot", |inner| async move { Ok(inner.merged_view().await) })
            .await
    }

    pub fn set_admin_token(&self, token: &str) -> Durability {
        let durability = self.inner.local.set_admin_token(token);
        self.inner.log.info("Admin token saved");
        durability
    }

    pub fn export_backup(&self) -> LocalBackup {
        self.inner.local.export_backup(Utc::now())
    }

    pub fn import_backup(&self, text: &str) -> Result<Durability, ApiError> {
        match self.inner.local.import_backup(text) {
            Ok(durability) => {
                self.inner.after_local_write(durability);
                self.inner.log.success("Local backup imported");
                Ok(durability)
            }
            Err(e) => self.fail("Import backup", e.into()),
        }
    }

    pub fn clear_local(&self) -> Durability {
        let durability = self.inner.local.clear();
        self.inner.after_local_write(durability);
        self.inner.log.info("Local items, cover and deletions cleared");
        durability
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use store::models::{Chart, ChartEntry, Critic, Movement, News};
    use store::{ItemBody, MemoryStore};

    use super::*;
    use crate::activity_log::LogLevel;
    use crate::transport::testing::{body_json, json as respond, ScriptedTransport};
    use crate::transport::{HttpRequest, HttpResponse, TransportError};

    type Reply = Result<HttpResponse, TransportError>;

    fn context(
        config: CmsConfig,
        handler: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
    ) -> (ClientContext, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new(handler);
        let ctx = ClientContext::new(
            config.with_queue_delay_ms(0),
            LocalStore::in_memory(),
            transport.clone(),
            Arc::new(NoPrompt),
        );
        (ctx, transport)
    }

    fn backend(req: &HttpRequest) -> Reply {
        if req.url.ends_with("/health") {
            return respond(200, json!({"success": true, "ok": true}));
        }
        if req.url.ends_with("/publish") {
            let mut item = body_json(req);
            item["id"] = json!("critic_0123456789abcdef");
            return respond(200, json!({"success": true, "item": item}));
        }
        respond(404, json!({"success": false, "error": "Not found"}))
    }

    fn critic(score: f64) -> ItemPayload {
        ItemPayload::new(ItemBody::Critic(Critic {
            album: "Blue".into(),
            artist: "Joni Mitchell".into(),
            score: Some(score),
            content: "A landmark.".into(),
            author: "Staff".into(),
            ..Default::default()
        }))
    }

    fn news(id: &str, headline: &str) -> ItemPayload {
        ItemPayload::new(ItemBody::News(News {
            category: "Tour".into(),
            headline: headline.into(),
            subtitle: "s".into(),
            content: "c".into(),
            author: "a".into(),
            ..Default::default()
        }))
        .with_id(id)
    }

    fn site(db: Value) -> impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static {
        move |req: &HttpRequest| {
            if req.url.ends_with("data/db.json") {
                respond(200, db.clone())
            } else {
                Ok(HttpResponse::new(404, "missing"))
            }
        }
    }

    fn static_config() -> CmsConfig {
        CmsConfig::new("").with_site_base("https://site.test")
    }

    #[tokio::test]
    async fn test_score_out_of_range_never_reaches_network() {
        let (ctx, transport) = context(CmsConfig::new("http://api.test"), backend);

        let err = ctx.publish(critic(10.5)).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Validation(ValidationError::ScoreOutOfRange(_))
        ));
        assert_eq!(transport.count(), 0);
        assert_eq!(ctx.log().entries()[0].level, LogLevel::Error);

        for score in [0.0, 10.0] {
            let item = ctx.publish(critic(score)).await.unwrap();
            assert_eq!(item.id, "critic_0123456789abcdef");
        }
        assert_eq!(transport.count_matching("/publish"), 2);
        assert_eq!(transport.count_matching("/health"), 1);
    }

    #[tokio::test]
    async fn test_short_chart_is_rejected() {
        let (ctx, transport) = context(CmsConfig::new("http://api.test"), backend);
        let entries = (1..=12)
            .map(|position| ChartEntry {
                position,
                track_title: format!("Song {position}"),
                artist: "Band".into(),
                movement: Movement::New,
                last_position: None,
            })
            .collect();
        let payload = ItemPayload::new(ItemBody::Chart(Chart {
            chart_title: "The Hot 15".into(),
            issue_number: "12".into(),
            entries,
        }));

        let err = ctx.publish(payload).await.unwrap_err();
        assert_eq!(err.to_string(), "chart entry 13 is required");
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_static_mode_rejects_remote_id_of_other_type() {
        let db = json!({"version": 1, "items": [
            {"id": "c1", "type": "critic", "album": "Blue", "createdAt": "2023-06-01T00:00:00Z"},
            {"id": "n1", "type": "news", "headline": "remote", "createdAt": "2023-07-01T00:00:00Z"}
        ]});
        let (ctx, _) = context(static_config(), site(db));

        let err = ctx.publish(news("c1", "clash")).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Store(StoreError::TypeMismatch {
                existing: ItemKind::Critic,
                requested: ItemKind::News,
                ..
            })
        ));
        assert!(matches!(
            ctx.update(news("c1", "clash")).await,
            Err(ApiError::Store(StoreError::TypeMismatch { .. }))
        ));
        assert_eq!(ctx.list(ItemKind::Critic).await.unwrap().len(), 1);
        assert!(ctx.local().load_items().is_empty());

        let shadow = ctx.publish(news("n1", "local copy")).await.unwrap();
        assert_eq!(
            shadow.created_at,
            store::models::parse_timestamp("2023-07-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_static_mode_merges_local_over_remote() {
        let db = json!({"version": 1, "items": [
            {"id": "1", "type": "news", "headline": "remote one", "publishedAt": "2024-01-02"},
            {"id": "2", "type": "news", "headline": "remote two", "publishedAt": "2024-01-01"}
        ]});
        let (ctx, _) = context(static_config(), site(db));
        assert_eq!(ctx.mode().await, Mode::Local);
        assert_eq!(ctx.list(ItemKind::News).await.unwrap().len(), 2);

        ctx.update(news("1", "updated")).await.unwrap();
        assert_eq!(ctx.delete(ItemKind::News, "2").await.unwrap(), 1);

        let items = ctx.list(ItemKind::News).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1");
        assert_eq!(items[0].display_title(), "updated");
        assert!(ctx.item(ItemKind::News, "2").await.unwrap().is_none());

        // re-publishing clears the tombstone
        ctx.publish(news("2", "back")).await.unwrap();
        assert_eq!(ctx.all_items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_static_demo_deletion_hides_remote_demo_items() {
        let db = json!({"version": 1, "items": [
            {"id": "d1", "type": "news", "headline": "demo", "isDemo": true},
            {"id": "r1", "type": "news", "headline": "real"}
        ]});
        let (ctx, _) = context(static_config(), site(db));
        ctx.publish(news("d2", "local demo").demo()).await.unwrap();
        assert_eq!(ctx.stats(true).await.unwrap().news, 2);

        assert_eq!(ctx.delete_demo().await.unwrap(), 2);
        let stats = ctx.stats(false).await.unwrap();
        assert_eq!(stats.news, 1);
        assert!(ctx.local().load_tombstones().contains("d1"));
    }

    #[tokio::test]
    async fn test_backend_all_items_skips_failing_type() {
        let (ctx, transport) = context(CmsConfig::new("http://api.test"), |req| {
            if req.url.ends_with("/health") {
                respond(200, json!({"success": true, "ok": true}))
            } else if req.url.contains("type=chart") {
                respond(500, json!({"success": false, "error": "boom"}))
            } else if req.url.contains("type=news") {
                respond(200, json!({"success": true, "items": [
                    {"id": "n1", "type": "news", "publishedAt": "2024-01-01"}
                ]}))
            } else if req.url.contains("type=critic") {
                respond(200, json!({"success": true, "items": [
                    {"id": "c1", "type": "critic", "publishedAt": "2024-02-01"}
                ]}))
            } else {
                respond(200, json!({"success": true, "items": []}))
            }
        });

        let items = ctx.all_items().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "n1"]);
        assert_eq!(transport.count_matching("/list"), 4);
    }

    #[tokio::test]
    async fn test_local_upload_returns_data_url() {
        let (ctx, transport) = context(CmsConfig::new(""), |_| respond(200, json!({})));
        let data = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(ctx.upload_image("a.png", data).await.unwrap(), data);
        assert!(matches!(
            ctx.upload_image("a.png", "nope").await,
            Err(ApiError::Validation(ValidationError::InvalidImageData))
        ));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_github_mode_without_credentials_is_config_error() {
        let (ctx, transport) = context(CmsConfig::new("").with_github(true), |_| {
            respond(200, json!({}))
        });
        assert_eq!(ctx.mode().await, Mode::Github);
        assert!(matches!(
            ctx.publish(critic(8.0)).await,
            Err(ApiError::Config(_))
        ));
        assert_eq!(transport.count(), 0);
        let entries = ctx.log().entries();
        assert_eq!(entries.last().map(|e| e.level), Some(LogLevel::Error));
    }

    #[tokio::test]
    async fn test_backup_import_replaces_local_state() {
        let (ctx, _) = context(static_config(), site(json!({"version": 1, "items": []})));
        ctx.publish(news("a", "first")).await.unwrap();
        let backup = serde_json::to_string(&ctx.export_backup()).unwrap();

        ctx.clear_local();
        assert!(ctx.all_items().await.unwrap().is_empty());

        assert!(ctx.import_backup(&backup).unwrap().is_persisted());
        assert_eq!(ctx.all_items().await.unwrap()[0].id, "a");
        assert!(ctx.import_backup("{\"kind\": \"other\"}").is_err());
    }

    #[tokio::test]
    async fn test_session_only_write_is_reported() {
        let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(404, "")));
        let ctx = ClientContext::new(
            CmsConfig::new("").with_queue_delay_ms(0),
            LocalStore::new(MemoryStore::with_quota(8)),
            transport,
            Arc::new(NoPrompt),
        );
        let item = ctx.publish(news("big", "does not fit")).await.unwrap();
        assert_eq!(item.id, "big");
        assert!(ctx
            .log()
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Warning));
        assert_eq!(ctx.list(ItemKind::News).await.unwrap().len(), 1);
    }
}
