//! # Static/remote merge layer
//!
//! Combines the read-only remote snapshot with the local store into the single item
//! collection the client reads from in static mode.
//!
//! Merge rule: local items first, then remote; the first occurrence of an id wins
//! wholesale (no field-level merge); tombstoned ids are dropped. The cover prefers the
//! local override over the remote document.
//!
//! [`MergeCache`] keeps the last [`MergedView`] for a short TTL so bursts of reads
//! share one snapshot fetch.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::local::LocalStore;
use crate::models::{sort_by_published_desc, Cover, Item, ItemKind, Snapshot, Stats};

/// `local ++ remote`, deduplicated by id keeping the first, minus `tombstones`.
pub fn merge_items(local: &[Item], remote: &[Item], tombstones: &BTreeSet<String>) -> Vec<Item> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for item in local.iter().chain(remote) {
        if item.id.is_empty() || !seen.insert(item.id.as_str()) {
            continue;
        }
        if !tombstones.contains(&item.id) {
            out.push(item.clone());
        }
    }
    out
}

/// The logical collection seen by readers in static mode.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedView {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<Item>,
    pub cover: Option<Cover>,
    /// The remote cover this view was built from, before the local override.
    #[serde(skip)]
    pub remote_cover: Option<Cover>,
}

impl MergedView {
    pub fn from_parts(
        remote: Snapshot,
        remote_cover: Option<Cover>,
        local_items: &[Item],
        local_cover: Option<Cover>,
        tombstones: &BTreeSet<String>,
    ) -> Self {
        Self {
            version: remote.version,
            updated_at: remote.updated_at,
            items: merge_items(local_items, &remote.items, tombstones),
            cover: local_cover.or_else(|| remote_cover.clone()),
            remote_cover,
        }
    }

    /// Merge `remote` with the current contents of `local`.
    pub fn build(remote: Snapshot, remote_cover: Option<Cover>, local: &LocalStore) -> Self {
        Self::from_parts(
            remote,
            remote_cover,
            &local.load_items(),
            local.load_cover(),
            &local.load_tombstones(),
        )
    }

    fn sorted<'a>(items: impl Iterator<Item = &'a Item>) -> Vec<Item> {
        let mut out: Vec<Item> = items.cloned().collect();
        sort_by_published_desc(&mut out);
        out
    }

    /// Items of one type, newest first.
    pub fn list(&self, kind: ItemKind) -> Vec<Item> {
        Self::sorted(self.items.iter().filter(|i| i.kind() == kind))
    }

    pub fn get(&self, kind: ItemKind, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.kind() == kind && i.id == id)
    }

    /// Newest `limit` published items across all types.
    pub fn latest(&self, limit: usize) -> Vec<Item> {
        let mut out = Self::sorted(self.items.iter().filter(|i| i.is_published()));
        out.truncate(limit);
        out
    }

    pub fn all_items(&self) -> Vec<Item> {
        Self::sorted(self.items.iter())
    }

    pub fn stats(&self, demo_only: bool) -> Stats {
        Stats::tally(self.items.iter().filter(|i| !demo_only || i.is_demo))
    }

    pub fn demo_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.is_demo)
            .map(|i| i.id.clone())
            .collect()
    }
}

/// Short-lived cache of the last merged view.
///
/// The remote cover of the last stored view outlives the TTL and `invalidate`, so a
/// rebuilt view can carry it without refetching.
#[derive(Debug)]
pub struct MergeCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, Arc<MergedView>)>>,
    last_remote_cover: Mutex<Option<Option<Cover>>>,
}

impl MergeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
            last_remote_cover: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self) -> MutexGuard<'_, Option<(Instant, Arc<MergedView>)>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached view if it was stored less than `ttl` before `now`.
    pub fn get_at(&self, now: Instant) -> Option<Arc<MergedView>> {
        self.slot()
            .as_ref()
            .filter(|(at, _)| now.saturating_duration_since(*at) < self.ttl)
            .map(|(_, view)| Arc::clone(view))
    }

    pub fn get_fresh(&self) -> Option<Arc<MergedView>> {
        self.get_at(Instant::now())
    }

    /// Remote cover of the last stored view; `None` until a view has been stored.
    pub fn last_remote_cover(&self) -> Option<Option<Cover>> {
        self.last_remote_cover
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Store `view` as the freshest value, restarting the TTL.
    pub fn replace(&self, view: MergedView) -> Arc<MergedView> {
        *self
            .last_remote_cover
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(view.remote_cover.clone());
        let view = Arc::new(view);
        *self.slot() = Some((Instant::now(), Arc::clone(&view)));
        view
    }

    pub fn invalidate(&self) {
        *self.slot() = None;
    }
}

impl Default for MergeCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_timestamp, ItemBody, News, Status};

    fn item(id: &str, headline: &str) -> Item {
        Item {
            id: id.to_string(),
            status: Status::Published,
            published_at: None,
            created_at: None,
            updated_at: None,
            is_demo: false,
            body: ItemBody::News(News {
                headline: headline.into(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_local_wins_and_tombstones_hide() {
        let remote = vec![item("1", "remote one"), item("2", "remote two")];
        let local = vec![item("1", "updated")];
        let tombstones = BTreeSet::from(["2".to_string()]);

        let merged = merge_items(&local, &remote, &tombstones);
        assert_eq!(merged, vec![item("1", "updated")]);
    }

    #[test]
    fn test_tombstone_hides_local_copy_too() {
        let local = vec![item("1", "local")];
        let tombstones = BTreeSet::from(["1".to_string()]);
        assert!(merge_items(&local, &[], &tombstones).is_empty());
    }

    #[test]
    fn test_view_reads() {
        let mut old = item("old", "old");
        old.published_at = parse_timestamp("2023-01-01");
        let mut new = item("new", "new");
        new.published_at = parse_timestamp("2024-01-01");
        let mut draft = item("draft", "draft");
        draft.status = Status::Draft;
        draft.published_at = parse_timestamp("2025-01-01");
        draft.is_demo = true;

        let view = MergedView::from_parts(
            Snapshot {
                items: vec![old, draft],
                ..Default::default()
            },
            None,
            &[new],
            None,
            &BTreeSet::new(),
        );

        let ids = |items: Vec<Item>| items.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(view.list(ItemKind::News)), vec!["draft", "new", "old"]);
        assert_eq!(ids(view.latest(1)), vec!["new"]);
        assert!(view.get(ItemKind::News, "old").is_some());
        assert!(view.get(ItemKind::Critic, "old").is_none());
        assert_eq!(view.stats(false).news, 3);
        assert_eq!(view.stats(true).news, 1);
        assert_eq!(view.demo_ids(), vec!["draft".to_string()]);
    }

    #[test]
    fn test_cover_prefers_local() {
        let remote = Cover {
            issue_number: "1".into(),
            ..Default::default()
        };
        let local = Cover {
            issue_number: "2".into(),
            ..Default::default()
        };
        let view = MergedView::from_parts(
            Snapshot::default(),
            Some(remote.clone()),
            &[],
            Some(local.clone()),
            &BTreeSet::new(),
        );
        assert_eq!(view.cover, Some(local));

        let view = MergedView::from_parts(
            Snapshot::default(),
            Some(remote.clone()),
            &[],
            None,
            &BTreeSet::new(),
        );
        assert_eq!(view.cover, Some(remote));
    }

    #[test]
    fn test_cache_ttl_and_invalidate() {
        let cache = MergeCache::new(Duration::from_millis(1500));
        assert!(cache.get_fresh().is_none());

        cache.replace(MergedView::default());
        assert!(cache.get_fresh().is_some());
        assert!(cache
            .get_at(Instant::now() + Duration::from_millis(1600))
            .is_none());

        cache.invalidate();
        assert!(cache.get_fresh().is_none());
    }

    #[test]
    fn test_cache_remembers_remote_cover() {
        let cache = MergeCache::new(Duration::from_millis(1500));
        assert_eq!(cache.last_remote_cover(), None);

        let remote = Cover {
            issue_number: "9".into(),
            ..Default::default()
        };
        let local = Cover {
            issue_number: "10".into(),
            ..Default::default()
        };
        cache.replace(MergedView::from_parts(
            Snapshot::default(),
            Some(remote.clone()),
            &[],
            Some(local),
            &BTreeSet::new(),
        ));
        cache.invalidate();
        assert_eq!(cache.last_remote_cover(), Some(Some(remote)));
    }
}
