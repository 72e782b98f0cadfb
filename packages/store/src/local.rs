//! # Local persistence store
//!
//! Client-side state used when no backend is reachable: items published locally, a
//! cover override, and a set of tombstoned ids hidden from the merged view. The same
//! store holds small settings values (admin token, API base override, GitHub
//! credentials).
//!
//! ## Keys
//!
//! | Key | Value |
//! |-----|-------|
//! | [`ITEMS_KEY`] | JSON array of [`Item`], newest write first |
//! | [`COVER_KEY`] | JSON [`Cover`] |
//! | [`DELETED_KEY`] | JSON array of tombstoned ids |
//! | [`ADMIN_TOKEN_KEY`], [`API_BASE_KEY`], `GITHUB_*` | plain strings |
//!
//! ## Durability
//!
//! Every write first updates an in-process session copy, then tries the backing
//! [`KeyValueStore`]. If that fails (quota, IO) the session copy still serves reads and
//! the write reports [`Durability::SessionOnly`] after logging a warning. Reads never
//! fail: missing or unparsable values decode as empty.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;
use crate::kv::KeyValueStore;
use crate::memory::MemoryStore;
use crate::models::{items_from_values, Cover, CoverPayload, Item, ItemPayload};
use crate::StoreError;

pub const ITEMS_KEY: &str = "cms_local_items_v1";
pub const COVER_KEY: &str = "cms_local_cover_v1";
pub const DELETED_KEY: &str = "cms_local_deleted_v1";
pub const ADMIN_TOKEN_KEY: &str = "cms_admin_token";
pub const API_BASE_KEY: &str = "cms_api_base";
pub const GITHUB_TOKEN_KEY: &str = "cms_github_token";
pub const GITHUB_REPO_KEY: &str = "cms_github_repo";
pub const GITHUB_BRANCH_KEY: &str = "cms_github_branch";

pub const BACKUP_KIND: &str = "cms_local_backup";
pub const BACKUP_VERSION: u32 = 1;

pub const DEFAULT_GITHUB_BRANCH: &str = "main";

/// Whether a local write reached the backing store.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Durability {
    Persisted,
    /// Visible for this session only; the backing store rejected the write.
    SessionOnly,
}

impl Durability {
    pub fn is_persisted(self) -> bool {
        self == Durability::Persisted
    }

    /// Combined outcome of two writes.
    pub fn and(self, other: Durability) -> Durability {
        if self.is_persisted() && other.is_persisted() {
            Durability::Persisted
        } else {
            Durability::SessionOnly
        }
    }
}

/// Saved repository coordinates for GitHub publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GithubCredentials {
    pub token: String,
    /// `owner/repo`
    pub repo: String,
    pub branch: String,
}

impl GithubCredentials {
    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty() && self.repo.contains('/')
    }
}

/// Export format of [`LocalStore::export_backup`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBackup {
    pub kind: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub data: BackupData,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupData {
    pub items: Vec<Item>,
    pub cover: Option<Cover>,
    pub deleted: Vec<String>,
}

impl BackupData {
    /// Accepts a full backup document or a bare JSON array of items.
    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        let parsed: Value = serde_json::from_str(text)?;
        match parsed {
            Value::Array(values) => Ok(BackupData {
                items: items_from_values(values),
                cover: None,
                deleted: Vec::new(),
            }),
            Value::Object(mut doc) => {
                if doc.get("kind").and_then(Value::as_str) != Some(BACKUP_KIND) {
                    return Err(StoreError::InvalidBackup("unexpected kind".to_string()));
                }
                let mut data = match doc.remove("data") {
                    Some(Value::Object(data)) => data,
                    _ => return Ok(BackupData::default()),
                };
                let items = match data.remove("items") {
                    Some(Value::Array(values)) => items_from_values(values),
                    _ => Vec::new(),
                };
                let cover = data
                    .remove("cover")
                    .filter(Value::is_object)
                    .and_then(|v| serde_json::from_value(v).ok());
                let deleted = match data.remove("deleted") {
                    Some(Value::Array(values)) => values.iter().filter_map(id_string).collect(),
                    _ => Vec::new(),
                };
                Ok(BackupData {
                    items,
                    cover,
                    deleted,
                })
            }
            _ => Err(StoreError::InvalidBackup("not a JSON object".to_string())),
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct Session {
    items: Option<Vec<Item>>,
    cover: Option<Option<Cover>>,
    tombstones: Option<BTreeSet<String>>,
    settings: HashMap<String, Option<String>>,
}

/// Local items, cover and tombstones over a [`KeyValueStore`]. Clones share state.
#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    pub fn new(kv: impl KeyValueStore + 'static) -> Self {
        Self::from_arc(Arc::new(kv))
    }

    pub fn from_arc(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            session: Arc::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, key: &str, value: Option<String>) -> Durability {
        let result = match &value {
            Some(v) => self.kv.set(key, v),
            None => self.kv.remove(key),
        };
        match result {
            Ok(()) => Durability::Persisted,
            Err(e) => {
                tracing::warn!("local write of {key} kept for this session only: {e}");
                Durability::SessionOnly
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Durability {
        match serde_json::to_string(value) {
            Ok(json) => self.write(key, Some(json)),
            Err(e) => {
                tracing::warn!("could not encode {key}: {e}");
                Durability::SessionOnly
            }
        }
    }

    // -- raw documents ----------------------------------------------------

    fn items_in(&self, session: &mut Session) -> Vec<Item> {
        if let Some(items) = &session.items {
            return items.clone();
        }
        let items = self
            .kv
            .get(ITEMS_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<Value>>(&raw).ok())
            .map(items_from_values)
            .unwrap_or_default();
        session.items = Some(items.clone());
        items
    }

    fn put_items(&self, session: &mut Session, items: Vec<Item>) -> Durability {
        let durability = self.write_json(ITEMS_KEY, &items);
        session.items = Some(items);
        durability
    }

    fn tombstones_in(&self, session: &mut Session) -> BTreeSet<String> {
        if let Some(set) = &session.tombstones {
            return set.clone();
        }
        let set: BTreeSet<String> = self
            .kv
            .get(DELETED_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<Value>>(&raw).ok())
            .map(|values| values.iter().filter_map(id_string).collect())
            .unwrap_or_default();
        session.tombstones = Some(set.clone());
        set
    }

    fn put_tombstones(&self, session: &mut Session, set: BTreeSet<String>) -> Durability {
        let durability = self.write_json(DELETED_KEY, &set);
        session.tombstones = Some(set);
        durability
    }

    fn cover_in(&self, session: &mut Session) -> Option<Cover> {
        if let Some(cover) = &session.cover {
            return cover.clone();
        }
        let cover = self
            .kv
            .get(COVER_KEY)
            .and_then(|raw| serde_json::from_str::<Cover>(&raw).ok());
        session.cover = Some(cover.clone());
        cover
    }

    fn put_cover(&self, session: &mut Session, cover: Option<Cover>) -> Durability {
        let durability = match &cover {
            Some(c) => self.write_json(COVER_KEY, c),
            None => self.write(COVER_KEY, None),
        };
        session.cover = Some(cover);
        durability
    }

    pub fn load_items(&self) -> Vec<Item> {
        let mut session = self.session();
        self.items_in(&mut session)
    }

    pub fn save_items(&self, items: &[Item]) -> Durability {
        let mut session = self.session();
        self.put_items(&mut session, items.to_vec())
    }

    pub fn load_cover(&self) -> Option<Cover> {
        let mut session = self.session();
        self.cover_in(&mut session)
    }

    pub fn save_cover(&self, cover: &Cover) -> Durability {
        let mut session = self.session();
        self.put_cover(&mut session, Some(cover.clone()))
    }

    pub fn load_tombstones(&self) -> BTreeSet<String> {
        let mut session = self.session();
        self.tombstones_in(&mut session)
    }

    pub fn save_tombstones(&self, set: &BTreeSet<String>) -> Durability {
        let mut session = self.session();
        self.put_tombstones(&mut session, set.clone())
    }

    pub fn mark_deleted(&self, id: &str) -> Durability {
        let id = id.trim();
        if id.is_empty() {
            return Durability::Persisted;
        }
        let mut session = self.session();
        let mut set = self.tombstones_in(&mut session);
        if !set.insert(id.to_string()) {
            return Durability::Persisted;
        }
        self.put_tombstones(&mut session, set)
    }

    pub fn clear_deleted(&self, id: &str) -> Durability {
        let id = id.trim();
        let mut session = self.session();
        let mut set = self.tombstones_in(&mut session);
        if !set.remove(id) {
            return Durability::Persisted;
        }
        self.put_tombstones(&mut session, set)
    }

    // -- item operations --------------------------------------------------

    fn upsert(&self, session: &mut Session, item: Item) -> Durability {
        let mut items = self.items_in(session);
        items.retain(|i| i.id != item.id);
        let id = item.id.clone();
        items.insert(0, item);
        let saved = self.put_items(session, items);

        let mut tombstones = self.tombstones_in(session);
        if tombstones.remove(&id) {
            saved.and(self.put_tombstones(session, tombstones))
        } else {
            saved
        }
    }

    /// Store a new item, or replace the local item with the same id.
    ///
    /// A payload without an id gets a fresh `{type}_{millis}_{hex}` id. Reusing the id of
    /// a local item of a different type fails with [`StoreError::TypeMismatch`].
    pub fn publish(
        &self,
        payload: ItemPayload,
        now: DateTime<Utc>,
    ) -> Result<(Item, Durability), StoreError> {
        let mut session = self.session();
        let existing = match &payload.id {
            Some(id) => self.items_in(&mut session).into_iter().find(|i| &i.id == id),
            None => None,
        };
        let item = match existing {
            Some(existing) if existing.kind() != payload.kind() => {
                let existing_kind = existing.kind();
                return Err(StoreError::TypeMismatch {
                    id: existing.id,
                    existing: existing_kind,
                    requested: payload.kind(),
                });
            }
            Some(existing) => payload.overwrite(&existing, now),
            None => {
                let id = payload
                    .id
                    .clone()
                    .unwrap_or_else(|| ids::local_id(payload.kind(), now));
                payload.into_item(id, now)
            }
        };
        let durability = self.upsert(&mut session, item.clone());
        Ok((item, durability))
    }

    /// Replace (or shadow a remote copy of) the item named by `payload.id`.
    pub fn update(
        &self,
        mut payload: ItemPayload,
        now: DateTime<Utc>,
    ) -> Result<(Item, Durability), StoreError> {
        let Some(id) = payload.id.clone() else {
            return Err(StoreError::MissingId);
        };
        let mut session = self.session();
        let existing = self.items_in(&mut session).into_iter().find(|i| i.id == id);
        let item = match existing {
            Some(existing) if existing.kind() != payload.kind() => {
                return Err(StoreError::TypeMismatch {
                    id,
                    existing: existing.kind(),
                    requested: payload.kind(),
                })
            }
            Some(existing) => payload.overwrite(&existing, now),
            None => {
                payload.created_at = payload.created_at.or(payload.published_at);
                payload.into_item(id, now)
            }
        };
        let durability = self.upsert(&mut session, item.clone());
        Ok((item, durability))
    }

    /// Drop the local copy and tombstone the id so a remote copy is hidden too.
    pub fn delete(&self, id: &str) -> Durability {
        let id = id.trim();
        if id.is_empty() {
            return Durability::Persisted;
        }
        let mut session = self.session();
        let mut items = self.items_in(&mut session);
        let before = items.len();
        items.retain(|i| i.id != id);
        let saved = if items.len() != before {
            self.put_items(&mut session, items)
        } else {
            Durability::Persisted
        };
        let mut tombstones = self.tombstones_in(&mut session);
        tombstones.insert(id.to_string());
        saved.and(self.put_tombstones(&mut session, tombstones))
    }

    /// Remove local demo items and tombstone `remote_demo_ids`. Returns how many
    /// distinct ids were hidden.
    pub fn delete_demo<I>(&self, remote_demo_ids: I) -> (usize, Durability)
    where
        I: IntoIterator<Item = String>,
    {
        let mut session = self.session();
        let mut items = self.items_in(&mut session);
        let mut hidden: BTreeSet<String> = items
            .iter()
            .filter(|i| i.is_demo)
            .map(|i| i.id.clone())
            .collect();
        items.retain(|i| !i.is_demo);
        let mut durability = if hidden.is_empty() {
            Durability::Persisted
        } else {
            self.put_items(&mut session, items)
        };

        let mut tombstones = self.tombstones_in(&mut session);
        let mut tombstoned = false;
        for id in remote_demo_ids {
            hidden.insert(id.clone());
            tombstoned |= tombstones.insert(id);
        }
        if tombstoned {
            durability = durability.and(self.put_tombstones(&mut session, tombstones));
        }
        (hidden.len(), durability)
    }

    /// Full overwrite of the local cover override.
    pub fn update_cover(&self, payload: CoverPayload, now: DateTime<Utc>) -> (Cover, Durability) {
        let cover = payload.into_cover(now);
        let mut session = self.session();
        let durability = self.put_cover(&mut session, Some(cover.clone()));
        (cover, durability)
    }

    // -- backup -----------------------------------------------------------

    pub fn export_backup(&self, now: DateTime<Utc>) -> LocalBackup {
        let mut session = self.session();
        LocalBackup {
            kind: BACKUP_KIND.to_string(),
            version: BACKUP_VERSION,
            exported_at: now,
            data: BackupData {
                items: self.items_in(&mut session),
                cover: self.cover_in(&mut session),
                deleted: self.tombstones_in(&mut session).into_iter().collect(),
            },
        }
    }

    /// Replace local items, cover and tombstones with the contents of `text`.
    pub fn import_backup(&self, text: &str) -> Result<Durability, StoreError> {
        let data = BackupData::from_json(text)?;
        let mut session = self.session();
        let durability = self
            .put_items(&mut session, data.items)
            .and(self.put_cover(&mut session, data.cover))
            .and(self.put_tombstones(&mut session, data.deleted.into_iter().collect()));
        Ok(durability)
    }

    /// Forget local items, cover and tombstones.
    pub fn clear(&self) -> Durability {
        let mut session = self.session();
        let durability = self
            .write(ITEMS_KEY, None)
            .and(self.write(COVER_KEY, None))
            .and(self.write(DELETED_KEY, None));
        session.items = Some(Vec::new());
        session.cover = Some(None);
        session.tombstones = Some(BTreeSet::new());
        durability
    }

    // -- settings ---------------------------------------------------------

    pub fn setting(&self, key: &str) -> Option<String> {
        let session = self.session();
        if let Some(value) = session.settings.get(key) {
            return value.clone();
        }
        drop(session);
        self.kv.get(key).filter(|v| !v.is_empty())
    }

    /// Store a setting. An empty value removes it.
    pub fn set_setting(&self, key: &str, value: &str) -> Durability {
        let value = value.trim();
        let value = (!value.is_empty()).then(|| value.to_string());
        let mut session = self.session();
        let durability = self.write(key, value.clone());
        session.settings.insert(key.to_string(), value);
        durability
    }

    /// Admin token sent with backend requests; empty when unset.
    pub fn admin_token(&self) -> String {
        self.setting(ADMIN_TOKEN_KEY).unwrap_or_default()
    }

    pub fn set_admin_token(&self, token: &str) -> Durability {
        self.set_setting(ADMIN_TOKEN_KEY, token)
    }

    /// Runtime backend origin override, trailing slashes stripped.
    pub fn api_base(&self) -> Option<String> {
        self.setting(API_BASE_KEY)
            .map(|base| base.trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
    }

    pub fn set_api_base(&self, base: &str) -> Durability {
        self.set_setting(API_BASE_KEY, base.trim().trim_end_matches('/'))
    }

    pub fn github_credentials(&self) -> GithubCredentials {
        GithubCredentials {
            token: self.setting(GITHUB_TOKEN_KEY).unwrap_or_default(),
            repo: self.setting(GITHUB_REPO_KEY).unwrap_or_default(),
            branch: self
                .setting(GITHUB_BRANCH_KEY)
                .unwrap_or_else(|| DEFAULT_GITHUB_BRANCH.to_string()),
        }
    }

    pub fn set_github_credentials(&self, creds: &GithubCredentials) -> Durability {
        self.set_setting(GITHUB_TOKEN_KEY, &creds.token)
            .and(self.set_setting(GITHUB_REPO_KEY, &creds.repo))
            .and(self.set_setting(GITHUB_BRANCH_KEY, &creds.branch))
    }
}
