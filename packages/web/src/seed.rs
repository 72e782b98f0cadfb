//! One-time bootstrap of the item database from the legacy per-type files
//! (`critics.json`, `news.json`, `interviews.json`, `charts.json`).
//!
//! Legacy records used looser field names; each mapper accepts the old alias as a
//! fallback (`title` for an album, `quote` for a pull quote, `date` for
//! `publishedAt`, ...). Charts without an `entries` array are rebuilt from their
//! `"Title - Artist | ..."` content string.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;

use store::chart::{parse_legacy_content, DEFAULT_CHART_TITLE};
use store::ids;
use store::models::{parse_timestamp, Chart, ChartEntry, Critic, Interview, News};
use store::{Item, ItemBody, ItemKind, Status};

/// First non-empty string (or number) among `keys`.
fn text(v: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match v.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn score(v: &Value) -> Option<f64> {
    match v.get("score")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn published_at(v: &Value, now: DateTime<Utc>) -> DateTime<Utc> {
    let raw = text(v, &["publishedAt", "date"]);
    parse_timestamp(&raw).unwrap_or(now)
}

fn status(v: &Value) -> Status {
    v.get("status")
        .cloned()
        .and_then(|s| serde_json::from_value(s).ok())
        .unwrap_or_default()
}

fn entries(v: &Value) -> Vec<ChartEntry> {
    match v.get("entries") {
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(|row| serde_json::from_value(row.clone()).ok())
            .collect(),
        _ => parse_legacy_content(&text(v, &["content"])),
    }
}

fn body(kind: ItemKind, v: &Value, now: DateTime<Utc>) -> ItemBody {
    match kind {
        ItemKind::Critic => ItemBody::Critic(Critic {
            album: text(v, &["album", "title"]),
            artist: text(v, &["artist"]),
            score: score(v),
            content: text(v, &["content"]),
            author: text(v, &["author"]),
            cover_image_url: text(v, &["coverImageUrl"]),
            subtitle: text(v, &["subtitle"]),
            pull_quote: text(v, &["pullQuote", "quote"]),
        }),
        ItemKind::News => ItemBody::News(News {
            category: text(v, &["category"]),
            headline: text(v, &["headline", "title"]),
            subtitle: text(v, &["subtitle"]),
            content: text(v, &["content"]),
            pull_quote: text(v, &["pullQuote", "quote"]),
            author: text(v, &["author"]),
            hero_image_url: text(v, &["heroImageUrl"]),
        }),
        ItemKind::Interview => ItemBody::Interview(Interview {
            guest: text(v, &["guest", "artist"]),
            title: text(v, &["title"]),
            subtitle: text(v, &["subtitle"]),
            content: text(v, &["content"]),
            key_quote: text(v, &["keyQuote", "quote"]),
            author: text(v, &["author"]),
            hero_image_url: text(v, &["heroImageUrl"]),
        }),
        ItemKind::Chart => {
            let chart_title = text(v, &["chartTitle", "title"]);
            let issue_number = text(v, &["issueNumber"]);
            ItemBody::Chart(Chart {
                chart_title: if chart_title.is_empty() {
                    DEFAULT_CHART_TITLE.to_string()
                } else {
                    chart_title
                },
                issue_number: if issue_number.is_empty() {
                    now.year().to_string()
                } else {
                    issue_number
                },
                entries: entries(v),
            })
        }
    }
}

/// Map one legacy record. Records without an id get a fresh server id.
pub fn map_record(kind: ItemKind, v: &Value, now: DateTime<Utc>) -> Item {
    let id = text(v, &["__backendId", "id"]);
    Item {
        id: if id.is_empty() { ids::server_id(kind) } else { id },
        status: status(v),
        published_at: Some(published_at(v, now)),
        created_at: None,
        updated_at: None,
        is_demo: v.get("isDemo").and_then(Value::as_bool).unwrap_or(false),
        body: body(kind, v, now),
    }
}

const SOURCES: [(&str, ItemKind); 4] = [
    ("critics.json", ItemKind::Critic),
    ("news.json", ItemKind::News),
    ("interviews.json", ItemKind::Interview),
    ("charts.json", ItemKind::Chart),
];

async fn read_records(path: &Path) -> Vec<Value> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_slice(&raw) {
        Ok(Value::Array(records)) => records,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "seed file is not an array, skipped");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "unreadable seed file, skipped: {e}");
            Vec::new()
        }
    }
}

/// Items from every legacy file in `data_dir`, in file order. Missing files contribute
/// nothing; duplicate ids are replaced with fresh ones.
pub async fn load_seed(data_dir: &Path, now: DateTime<Utc>) -> Vec<Item> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    for (file, kind) in SOURCES {
        for record in read_records(&data_dir.join(file)).await {
            let mut item = map_record(kind, &record, now);
            while !seen.insert(item.id.clone()) {
                item.id = ids::server_id(kind);
            }
            items.push(item);
        }
    }
    tracing::info!(count = items.len(), "seeded item database from legacy files");
    items
}
