//! # File-backed item database
//!
//! The authoritative store behind the HTTP surface: one JSON document for items
//! (`db.json`) and one for the cover (`cover.json`), both in the data directory.
//!
//! Every operation takes the database mutex, loads the whole document, mutates it and
//! writes it back through a temp file plus rename, so readers never see a partial
//! file and two requests never interleave a read-modify-write cycle.
//!
//! On first access, when `db.json` does not exist, it is seeded once from the legacy
//! per-type files (see [`crate::seed`]).

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;

use store::models::sort_by_published_desc;
use store::{ids, Cover, CoverPayload, Item, ItemKind, ItemPayload, Snapshot, Stats};

use crate::seed;

pub const DB_FILE: &str = "db.json";
pub const COVER_FILE: &str = "cover.json";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Not found")]
    NotFound,
    /// Rejected input; the message is shown to the caller.
    #[error("{0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt database: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `bytes` to `path` via `{path}.tmp` and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[derive(Debug)]
pub struct FileDatabase {
    data_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileDatabase {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    fn cover_path(&self) -> PathBuf {
        self.data_dir.join(COVER_FILE)
    }

    /// Load the document, seeding it first if it does not exist. Caller holds the lock.
    async fn load(&self) -> Result<Snapshot, DbError> {
        let path = self.db_path();
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Snapshot::from_json(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let now = Utc::now();
                let db = Snapshot::new(seed::load_seed(&self.data_dir, now).await, now);
                write_atomic(&path, db.to_json_pretty()?.as_bytes()).await?;
                Ok(db)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, db: &mut Snapshot) -> Result<(), DbError> {
        db.updated_at = Some(Utc::now());
        write_atomic(&self.db_path(), db.to_json_pretty()?.as_bytes()).await?;
        Ok(())
    }

    /// Items of one type, newest first.
    pub async fn list(&self, kind: ItemKind) -> Result<Vec<Item>, DbError> {
        let _guard = self.lock.lock().await;
        let mut items: Vec<Item> = self
            .load()
            .await?
            .items
            .into_iter()
            .filter(|i| i.kind() == kind)
            .collect();
        sort_by_published_desc(&mut items);
        Ok(items)
    }

    pub async fn get(&self, kind: ItemKind, id: &str) -> Result<Item, DbError> {
        let _guard = self.lock.lock().await;
        self.load()
            .await?
            .items
            .into_iter()
            .find(|i| i.kind() == kind && i.id == id)
            .ok_or(DbError::NotFound)
    }

    /// Store a new item. A caller-supplied id is kept only if no item uses it yet;
    /// otherwise a fresh `{type}_{hex}` id is assigned.
    pub async fn publish(&self, payload: ItemPayload) -> Result<Item, DbError> {
        let _guard = self.lock.lock().await;
        let mut db = self.load().await?;
        let taken: HashSet<String> = db.known_ids().collect();

        let kind = payload.kind();
        let id = match &payload.id {
            Some(id) if !taken.contains(id) => id.clone(),
            _ => loop {
                let candidate = ids::server_id(kind);
                if !taken.contains(&candidate) {
                    break candidate;
                }
            },
        };

        let now = Utc::now();
        let mut item = payload.into_item(id, now);
        item.created_at = Some(now);
        db.items.push(item.clone());
        self.save(&mut db).await?;
        tracing::info!(id = %item.id, %kind, "published");
        Ok(item)
    }

    /// Full overwrite of the item matching `payload`'s type and id. Its id, type and
    /// `createdAt` are kept.
    pub async fn update(&self, payload: ItemPayload) -> Result<Item, DbError> {
        let Some(id) = payload.id.clone() else {
            return Err(DbError::Invalid("Missing id".to_string()));
        };
        let kind = payload.kind();
        let _guard = self.lock.lock().await;
        let mut db = self.load().await?;
        let slot = db
            .items
            .iter_mut()
            .find(|i| i.kind() == kind && i.id == id)
            .ok_or(DbError::NotFound)?;
        let item = payload.overwrite(slot, Utc::now());
        *slot = item.clone();
        self.save(&mut db).await?;
        tracing::info!(%id, %kind, "updated");
        Ok(item)
    }

    /// Remove every item matching `(kind, id)`; at least one must exist.
    pub async fn delete(&self, kind: ItemKind, id: &str) -> Result<usize, DbError> {
        let _guard = self.lock.lock().await;
        let mut db = self.load().await?;
        let before = db.items.len();
        db.items.retain(|i| !(i.kind() == kind && i.id == id));
        let deleted = before - db.items.len();
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        self.save(&mut db).await?;
        tracing::info!(%id, %kind, "deleted");
        Ok(deleted)
    }

    pub async fn delete_all_demo(&self) -> Result<usize, DbError> {
        let _guard = self.lock.lock().await;
        let mut db = self.load().await?;
        let before = db.items.len();
        db.items.retain(|i| !i.is_demo);
        let deleted = before - db.items.len();
        self.save(&mut db).await?;
        tracing::info!(deleted, "demo items removed");
        Ok(deleted)
    }

    /// Newest published items across all types.
    pub async fn latest(&self, limit: usize) -> Result<Vec<Item>, DbError> {
        let _guard = self.lock.lock().await;
        let mut items: Vec<Item> = self
            .load()
            .await?
            .items
            .into_iter()
            .filter(Item::is_published)
            .collect();
        sort_by_published_desc(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    pub async fn stats(&self, demo_only: bool) -> Result<Stats, DbError> {
        let _guard = self.lock.lock().await;
        let db = self.load().await?;
        Ok(Stats::tally(
            db.items.iter().filter(|i| !demo_only || i.is_demo),
        ))
    }

    /// The current cover; a missing or unreadable file means none.
    pub async fn cover(&self) -> Result<Option<Cover>, DbError> {
        let _guard = self.lock.lock().await;
        let path = self.cover_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(cover) => Ok(cover),
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable cover: {e}");
                Ok(None)
            }
        }
    }

    /// Replace the cover. Issue number, date and description are required.
    pub async fn set_cover(&self, payload: CoverPayload) -> Result<Cover, DbError> {
        let cover = payload.into_cover(Utc::now());
        if [&cover.issue_number, &cover.issue_date, &cover.description]
            .iter()
            .any(|field| field.is_empty())
        {
            return Err(DbError::Invalid("Missing cover fields".to_string()));
        }
        let _guard = self.lock.lock().await;
        let json = serde_json::to_string_pretty(&cover)?;
        write_atomic(&self.cover_path(), json.as_bytes()).await?;
        tracing::info!(issue = %cover.issue_number, "cover updated");
        Ok(cover)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use store::models::News;
    use store::ItemBody;

    use super::*;

    fn news(headline: &str) -> ItemPayload {
        ItemPayload::new(ItemBody::News(News {
            headline: headline.into(),
            ..Default::default()
        }))
    }

    fn database() -> (tempfile::TempDir, FileDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = FileDatabase::new(dir.path().join("data"));
        (dir, db)
    }

    #[tokio::test]
    async fn test_publish_assigns_and_keeps_ids() {
        let (_dir, db) = database();
        let first = db.publish(news("a")).await.unwrap();
        assert!(first.id.starts_with("news_"));
        assert_eq!(first.id.len(), "news_".len() + 16);

        let chosen = db.publish(news("b").with_id("mine")).await.unwrap();
        assert_eq!(chosen.id, "mine");

        let collided = db.publish(news("c").with_id("mine")).await.unwrap();
        assert_ne!(collided.id, "mine");
        assert_eq!(
            db.get(ItemKind::News, "mine").await.unwrap().display_title(),
            "b"
        );
        assert_eq!(db.list(ItemKind::News).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_legacy_records_survive_publish() {
        let (_dir, db) = database();
        tokio::fs::create_dir_all(db.data_dir()).await.unwrap();
        let raw = json!({
            "version": 1,
            "items": [
                {"id": 7, "type": "critic", "album": "Legacy LP"},
                {"id": "p1", "type": "podcast", "title": "Unknown kind"},
                {"id": "n1", "type": "news", "headline": "Existing"}
            ]
        });
        tokio::fs::write(db.db_path(), raw.to_string()).await.unwrap();

        assert_eq!(db.list(ItemKind::Critic).await.unwrap()[0].id, "7");
        let collided = db.publish(news("fresh").with_id("p1")).await.unwrap();
        assert_ne!(collided.id, "p1");

        let written = tokio::fs::read_to_string(db.db_path()).await.unwrap();
        assert!(written.contains("Legacy LP"));
        assert!(written.contains("Unknown kind"));
        assert_eq!(db.get(ItemKind::Critic, "7").await.unwrap().display_title(), "Legacy LP");
        assert_eq!(db.list(ItemKind::News).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_item_leaves_file_untouched() {
        let (_dir, db) = database();
        db.publish(news("a").with_id("n1")).await.unwrap();
        let before = tokio::fs::read(db.db_path()).await.unwrap();

        assert!(matches!(
            db.update(news("x").with_id("nope")).await,
            Err(DbError::NotFound)
        ));
        // same id, other type
        let critic = ItemPayload::new(ItemBody::Critic(Default::default())).with_id("n1");
        assert!(matches!(db.update(critic).await, Err(DbError::NotFound)));

        assert_eq!(tokio::fs::read(db.db_path()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let (_dir, db) = database();
        let original = db.publish(news("a").with_id("n1")).await.unwrap();
        let updated = db.update(news("b").with_id("n1")).await.unwrap();
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.published_at, original.published_at);
        assert_eq!(updated.display_title(), "b");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, db) = database();
        db.publish(news("a").with_id("n1")).await.unwrap();
        assert_eq!(db.delete(ItemKind::News, "n1").await.unwrap(), 1);
        assert!(matches!(
            db.get(ItemKind::News, "n1").await,
            Err(DbError::NotFound)
        ));
        assert!(matches!(
            db.delete(ItemKind::News, "n1").await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_seeds_once() {
        let (dir, db) = database();
        let data = dir.path().join("data");
        tokio::fs::create_dir_all(&data).await.unwrap();
        tokio::fs::write(
            data.join("news.json"),
            json!([{"id": "legacy", "title": "Old news", "isDemo": true}]).to_string(),
        )
        .await
        .unwrap();

        assert_eq!(db.list(ItemKind::News).await.unwrap()[0].id, "legacy");
        assert_eq!(db.delete_all_demo().await.unwrap(), 1);
        // the seed file is still there but the database exists now
        assert!(db.list(ItemKind::News).await.unwrap().is_empty());
        assert_eq!(db.stats(false).await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_latest_only_published() {
        let (_dir, db) = database();
        let mut draft = news("draft");
        draft.status = Some(store::Status::Draft);
        db.publish(draft).await.unwrap();
        db.publish(news("live")).await.unwrap();
        let latest = db.latest(6).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].display_title(), "live");
    }

    #[tokio::test]
    async fn test_cover_replaced_wholesale() {
        let (_dir, db) = database();
        assert_eq!(db.cover().await.unwrap(), None);

        let first = CoverPayload {
            issue_number: "1".into(),
            issue_date: "2024-01-01".into(),
            description: "first".into(),
            cover_image_url: "/assets/uploads/a.png".into(),
        };
        db.set_cover(first).await.unwrap();
        let second = CoverPayload {
            issue_number: " 2 ".into(),
            issue_date: "2024-02-01".into(),
            description: "second".into(),
            cover_image_url: String::new(),
        };
        db.set_cover(second).await.unwrap();

        let cover = db.cover().await.unwrap().unwrap();
        assert_eq!(cover.issue_number, "2");
        assert_eq!(cover.cover_image_url, "");

        let err = db.set_cover(CoverPayload::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing cover fields");
    }

    #[tokio::test]
    async fn test_concurrent_publishes_all_land() {
        let (_dir, db) = database();
        let db = std::sync::Arc::new(db);
        let tasks: Vec<_> = (0..10)
            .map(|n| {
                let db = db.clone();
                tokio::spawn(async move { db.publish(news(&format!("n{n}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(db.list(ItemKind::News).await.unwrap().len(), 10);
    }
}
