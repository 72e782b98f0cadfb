//! # Domain models for published content
//!
//! Defines the records that every storage path (server file database, local store,
//! static snapshot, GitHub commit) agrees on. All types are `Serialize + Deserialize`
//! with camelCase field names so the JSON documents on disk, in the browser-side
//! snapshot, and on the wire are the same shape.
//!
//! ## Types
//!
//! | Type | Represents |
//! |------|-----------|
//! | [`Item`] | A stored content unit. Common metadata (`id`, `status`, timestamps, `isDemo`) plus a flattened [`ItemBody`]. |
//! | [`ItemBody`] | Tagged union on `type`: [`Critic`], [`News`], [`Interview`], [`Chart`]. Each variant has a fixed field set; unknown input fields are dropped. |
//! | [`ItemPayload`] | The write-side shape sent by an editor. Same body, but `id` and timestamps are optional and assigned by whichever store persists it first. |
//! | [`Cover`] / [`CoverPayload`] | The singleton magazine cover and its write-side shape. |
//! | [`Snapshot`] | The whole item database document: `{version, createdAt, updatedAt, items}`. |
//! | [`Stats`] | Per-kind counts reported by `stats`. |
//!
//! ## Ordering
//!
//! Listings are sorted by [`Item::sort_key`] descending: `publishedAt`, falling back to
//! `createdAt`, then the Unix epoch. [`sort_by_published_desc`] is stable, so items with
//! equal keys keep their storage order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::StoreError;

/// Version tag written into every [`Snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Discriminant of an [`ItemBody`], used in queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Critic,
    News,
    Interview,
    Chart,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Critic,
        ItemKind::News,
        ItemKind::Interview,
        ItemKind::Chart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Critic => "critic",
            ItemKind::News => "news",
            ItemKind::Interview => "interview",
            ItemKind::Chart => "chart",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "critic" => Ok(ItemKind::Critic),
            "news" => Ok(ItemKind::News),
            "interview" => Ok(ItemKind::Interview),
            "chart" => Ok(ItemKind::Chart),
            other => Err(StoreError::UnknownKind(other.to_string())),
        }
    }
}

/// Publication status. Only `published` items show up in "latest" listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Published,
    Draft,
    #[serde(other)]
    Other,
}

/// Album review.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Critic {
    pub album: String,
    pub artist: String,
    /// 0.0 ..= 10.0; `None` only for legacy seed data.
    pub score: Option<f64>,
    pub content: String,
    pub author: String,
    pub cover_image_url: String,
    pub subtitle: String,
    pub pull_quote: String,
}

/// News article.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct News {
    pub category: String,
    pub headline: String,
    pub subtitle: String,
    pub content: String,
    pub pull_quote: String,
    pub author: String,
    pub hero_image_url: String,
}

/// Interview.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interview {
    pub guest: String,
    pub title: String,
    pub subtitle: String,
    pub content: String,
    pub key_quote: String,
    pub author: String,
    pub hero_image_url: String,
}

/// Weekly chart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Chart {
    pub chart_title: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub issue_number: String,
    pub entries: Vec<ChartEntry>,
}

/// Position change of a chart entry relative to the previous issue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    Up,
    Down,
    #[default]
    New,
    Same,
    Reentry,
}

impl FromStr for Movement {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Movement::Up),
            "down" => Ok(Movement::Down),
            "new" => Ok(Movement::New),
            "same" => Ok(Movement::Same),
            "reentry" => Ok(Movement::Reentry),
            other => Err(StoreError::UnknownMovement(other.to_string())),
        }
    }
}

/// One row of a [`Chart`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub position: u32,
    pub track_title: String,
    pub artist: String,
    #[serde(default)]
    pub movement: Movement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_position: Option<u32>,
}

/// Type-specific fields, discriminated by the `type` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemBody {
    Critic(Critic),
    News(News),
    Interview(Interview),
    Chart(Chart),
}

impl ItemBody {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemBody::Critic(_) => ItemKind::Critic,
            ItemBody::News(_) => ItemKind::News,
            ItemBody::Interview(_) => ItemKind::Interview,
            ItemBody::Chart(_) => ItemKind::Chart,
        }
    }

    /// Human-readable title used in commit messages and log lines.
    pub fn display_title(&self) -> &str {
        match self {
            ItemBody::Critic(c) => &c.album,
            ItemBody::News(n) => &n.headline,
            ItemBody::Interview(i) => &i.title,
            ItemBody::Chart(c) => &c.chart_title,
        }
    }
}

/// A stored content unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: Status,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(flatten)]
    pub body: ItemBody,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        self.body.kind()
    }

    pub fn is_published(&self) -> bool {
        self.status == Status::Published
    }

    /// `publishedAt`, else `createdAt`, else the epoch.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.published_at
            .or(self.created_at)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn display_title(&self) -> &str {
        self.body.display_title()
    }
}

/// Write-side shape of an [`Item`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    #[serde(
        default,
        deserialize_with = "de_opt_nonempty",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(flatten)]
    pub body: ItemBody,
}

impl ItemPayload {
    pub fn new(body: ItemBody) -> Self {
        Self {
            id: None,
            status: None,
            published_at: None,
            created_at: None,
            is_demo: false,
            body,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn demo(mut self) -> Self {
        self.is_demo = true;
        self
    }

    pub fn kind(&self) -> ItemKind {
        self.body.kind()
    }

    /// Materialise a new item under `id`. Missing `publishedAt`/`createdAt` become `now`.
    pub fn into_item(self, id: String, now: DateTime<Utc>) -> Item {
        Item {
            id,
            status: self.status.unwrap_or_default(),
            published_at: Some(self.published_at.unwrap_or(now)),
            created_at: Some(self.created_at.unwrap_or(now)),
            updated_at: Some(now),
            is_demo: self.is_demo,
            body: self.body,
        }
    }

    /// Full overwrite of `existing`: keeps its id, type and `createdAt`, replaces the rest.
    pub fn overwrite(self, existing: &Item, now: DateTime<Utc>) -> Item {
        Item {
            id: existing.id.clone(),
            status: self.status.unwrap_or(existing.status),
            published_at: self.published_at.or(existing.published_at).or(Some(now)),
            created_at: existing.created_at.or(self.created_at).or(Some(now)),
            updated_at: Some(now),
            is_demo: self.is_demo,
            body: self.body,
        }
    }
}

impl From<Item> for ItemPayload {
    fn from(item: Item) -> Self {
        Self {
            id: Some(item.id),
            status: Some(item.status),
            published_at: item.published_at,
            created_at: item.created_at,
            is_demo: item.is_demo,
            body: item.body,
        }
    }
}

/// The singleton magazine cover.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cover {
    #[serde(deserialize_with = "de_string_or_number")]
    pub issue_number: String,
    pub issue_date: String,
    pub description: String,
    pub cover_image_url: String,
    #[serde(
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Write-side shape of a [`Cover`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverPayload {
    #[serde(deserialize_with = "de_string_or_number")]
    pub issue_number: String,
    pub issue_date: String,
    pub description: String,
    pub cover_image_url: String,
}

impl CoverPayload {
    /// Trimmed copy stamped with `now`. The previous cover is not consulted.
    pub fn into_cover(self, now: DateTime<Utc>) -> Cover {
        Cover {
            issue_number: self.issue_number.trim().to_string(),
            issue_date: self.issue_date.trim().to_string(),
            description: self.description.trim().to_string(),
            cover_image_url: self.cover_image_url.trim().to_string(),
            updated_at: Some(now),
        }
    }
}

/// The item database document shared by the server file, the static snapshot and the
/// GitHub-committed copy.
///
/// Records that do not decode as an [`Item`] are kept verbatim in `unparsed` and written
/// back after `items`, so a read-modify-write cycle never loses data it cannot read.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "RawSnapshot")]
pub struct Snapshot {
    pub version: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<Item>,
    pub unparsed: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    items: Option<Vec<serde_json::Value>>,
}

impl From<RawSnapshot> for Snapshot {
    fn from(raw: RawSnapshot) -> Self {
        let (items, unparsed) = split_items(raw.items.unwrap_or_default());
        Self {
            version: raw.version,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            items,
            unparsed,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    items: ItemsRef<'a>,
}

struct ItemsRef<'a>(&'a [Item], &'a [serde_json::Value]);

impl Serialize for ItemsRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len() + self.1.len()))?;
        for item in self.0 {
            seq.serialize_element(item)?;
        }
        for raw in self.1 {
            seq.serialize_element(raw)?;
        }
        seq.end()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SnapshotRef {
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items: ItemsRef(&self.items, &self.unparsed),
        }
        .serialize(serializer)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at: None,
            updated_at: None,
            items: Vec::new(),
            unparsed: Vec::new(),
        }
    }
}

impl Snapshot {
    pub fn new(items: Vec<Item>, now: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at: Some(now),
            updated_at: Some(now),
            items,
            unparsed: Vec::new(),
        }
    }

    /// Parse a document. Items that do not match the schema land in `unparsed`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.known_ids().any(|known| known == id)
    }

    /// Ids of every record, including the ones kept in `unparsed`.
    pub fn known_ids(&self) -> impl Iterator<Item = String> + '_ {
        let raw_ids = self.unparsed.iter().filter_map(|raw| match raw.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        self.items.iter().map(|i| i.id.clone()).chain(raw_ids)
    }
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Per-kind item counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub critics: usize,
    pub news: usize,
    pub interviews: usize,
    pub charts: usize,
}

impl Stats {
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        let mut stats = Stats::default();
        for item in items {
            match item.kind() {
                ItemKind::Critic => stats.critics += 1,
                ItemKind::News => stats.news += 1,
                ItemKind::Interview => stats.interviews += 1,
                ItemKind::Chart => stats.charts += 1,
            }
        }
        stats
    }
}

/// Stable sort, newest first.
pub fn sort_by_published_desc(items: &mut [Item]) {
    items.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

/// Parse an editor-supplied timestamp: RFC 3339, or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
    }
}

fn de_opt_nonempty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = de_string_or_number(deserializer)?;
    let raw = raw.trim();
    Ok((!raw.is_empty()).then(|| raw.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(serde_json::Number),
}

fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::Str(s)) => s,
        Some(StringOrNumber::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Decode each value independently, returning the items and the values that did not parse.
fn split_items(values: Vec<serde_json::Value>) -> (Vec<Item>, Vec<serde_json::Value>) {
    let mut items = Vec::with_capacity(values.len());
    let mut unparsed = Vec::new();
    for value in values {
        match Item::deserialize(&value) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!("keeping undecodable item as-is: {e}");
                unparsed.push(value);
            }
        }
    }
    (items, unparsed)
}

/// Decode each value independently, dropping (and logging) the ones that do not parse.
pub fn items_from_values(values: Vec<serde_json::Value>) -> Vec<Item> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Item>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("skipping malformed item: {e}");
                None
            }
        })
        .collect()
}
