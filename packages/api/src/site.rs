//! Read-only access to the published static site (`data/db.json`, `data/cover.json`).
//! Every failure degrades to "nothing published yet".

use std::sync::Arc;

use serde::de::DeserializeOwned;
use store::config::SiteConfig;
use store::{Cover, Snapshot};

use crate::transport::{HttpRequest, HttpTransport};

#[derive(Clone)]
pub struct SnapshotSource {
    transport: Arc<dyn HttpTransport>,
    base: String,
    db_path: String,
    cover_path: String,
}

impl SnapshotSource {
    pub fn new(transport: Arc<dyn HttpTransport>, site: &SiteConfig) -> Self {
        Self {
            transport,
            base: site.base.trim_end_matches('/').to_string(),
            db_path: site.db_path.trim_start_matches('/').to_string(),
            cover_path: site.cover_path.trim_start_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> Option<String> {
        if self.base.is_empty() {
            None
        } else {
            Some(format!("{}/{}", self.base, path))
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let url = self.url(path)?;
        let request = HttpRequest::get(url.as_str()).header("Cache-Control", "no-cache");
        let response = match self.transport.send(request).await {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                tracing::debug!(%url, status = r.status, "static document unavailable");
                return None;
            }
            Err(e) => {
                tracing::debug!(%url, "static fetch failed: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&response.body) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%url, "static document is not valid JSON: {e}");
                None
            }
        }
    }

    /// The published item database, or an empty one.
    pub async fn snapshot(&self) -> Snapshot {
        self.fetch(&self.db_path).await.unwrap_or_default()
    }

    pub async fn cover(&self) -> Option<Cover> {
        self.fetch::<Option<Cover>>(&self.cover_path).await.flatten()
    }
}
