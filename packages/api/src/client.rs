//! # Retrying API client
//!
//! [`ApiClient::request`] performs one logical call against the backend, retrying while
//! the server signals a rate limit. The typed wrappers below it mirror the server's
//! HTTP surface and unwrap its `{"success": ..}` envelope.
//!
//! ## Response handling
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 429, or a JSON `error` mentioning "rate limit" | wait `base * 2^attempt`, retry; after `max_retries` retries [`ApiError::RateLimited`] |
//! | 404 | [`ApiError::NotFound`] |
//! | body is not JSON | [`ApiError::Parse`] |
//! | other non-2xx | [`ApiError::Server`] with the body's `error`, else `API error: {status}` |
//! | transport failure | [`ApiError::Network`] |
//!
//! The admin token is read from the local store on every attempt, so a token saved
//! mid-session applies to the next call.

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use store::config::RetryConfig;
use store::{Cover, CoverPayload, Item, ItemKind, ItemPayload, LocalStore, Stats};

use crate::activity_log::ActivityLog;
use crate::transport::{HttpRequest, HttpTransport, Method};
use crate::ApiError;

pub const ADMIN_TOKEN_HEADER: &str = "X-ADMIN-TOKEN";

/// Build `path?k=v&..` with percent-encoded values.
pub fn endpoint(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, NON_ALPHANUMERIC)))
        .collect();
    format!("{path}?{}", pairs.join("&"))
}

fn error_message(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn mentions_rate_limit(value: &Value) -> bool {
    error_message(value).is_some_and(|e| e.to_lowercase().contains("rate limit"))
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    base: String,
    retry: RetryConfig,
    local: LocalStore,
    log: ActivityLog,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base: impl Into<String>,
        retry: RetryConfig,
        local: LocalStore,
        log: ActivityLog,
    ) -> Self {
        Self {
            transport,
            base: base.into().trim_end_matches('/').to_string(),
            retry,
            local,
            log,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base, endpoint);
        let payload = match (method, body) {
            (Method::Get, _) | (_, None) => None,
            (_, Some(value)) => Some(serde_json::to_vec(value).map_err(|e| ApiError::Parse {
                status: 0,
                message: e.to_string(),
            })?),
        };

        let mut attempt = 0;
        loop {
            let mut request = HttpRequest::new(method, url.clone())
                .header("Content-Type", "application/json")
                .header(ADMIN_TOKEN_HEADER, self.local.admin_token());
            if let Some(payload) = &payload {
                request = request.body(payload.clone());
            }

            let response = self
                .transport
                .send(request)
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            let status = response.status;
            let parsed = serde_json::from_slice::<Value>(&response.body);

            let rate_limited =
                status == 429 || parsed.as_ref().is_ok_and(mentions_rate_limit);
            if rate_limited {
                if attempt >= self.retry.max_retries {
                    return Err(ApiError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
                let wait = self.retry.backoff(attempt);
                attempt += 1;
                self.log.warning(format!(
                    "Rate limited on {endpoint}, retry {attempt}/{} in {}ms",
                    self.retry.max_retries,
                    wait.as_millis()
                ));
                tokio::time::sleep(wait).await;
                continue;
            }

            if status == 404 {
                let message = parsed
                    .as_ref()
                    .ok()
                    .and_then(error_message)
                    .unwrap_or_else(|| format!("API error: {status}"));
                return Err(ApiError::NotFound(message));
            }

            let value = parsed.map_err(|e| ApiError::Parse {
                status,
                message: e.to_string(),
            })?;

            if !response.is_success() {
                return Err(ApiError::Server {
                    status,
                    message: error_message(&value)
                        .unwrap_or_else(|| format!("API error: {status}")),
                });
            }
            return Ok(value);
        }
    }

    async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let value = self.request(endpoint, method, body).await?;
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::Server {
                status: 200,
                message: error_message(&value).unwrap_or_else(|| "Request failed".to_string()),
            });
        }
        Ok(value)
    }

    fn field<T: DeserializeOwned>(value: &mut Value, name: &str) -> Result<T, ApiError> {
        let field = value.get_mut(name).map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value(field).map_err(|e| ApiError::Parse {
            status: 200,
            message: format!("{name}: {e}"),
        })
    }

    fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
        serde_json::to_value(value).map_err(|e| ApiError::Parse {
            status: 0,
            message: e.to_string(),
        })
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        self.call("/health", Method::Get, None).await.map(|_| ())
    }

    pub async fn publish(&self, payload: &ItemPayload) -> Result<Item, ApiError> {
        let body = Self::to_body(payload)?;
        let mut value = self.call("/publish", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "item")
    }

    pub async fn update(&self, payload: &ItemPayload) -> Result<Item, ApiError> {
        let body = Self::to_body(payload)?;
        let mut value = self.call("/update", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "item")
    }

    pub async fn delete(&self, kind: ItemKind, id: &str) -> Result<usize, ApiError> {
        let body = json!({ "type": kind, "id": id });
        let mut value = self.call("/delete", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "deleted")
    }

    pub async fn delete_demo(&self) -> Result<usize, ApiError> {
        let body = json!({});
        let mut value = self.call("/deleteDemo", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "deleted")
    }

    pub async fn list(&self, kind: ItemKind) -> Result<Vec<Item>, ApiError> {
        let path = endpoint("/list", &[("type", kind.as_str())]);
        let mut value = self.call(&path, Method::Get, None).await?;
        Self::field(&mut value, "items")
    }

    /// `None` when the server has no such item.
    pub async fn item(&self, kind: ItemKind, id: &str) -> Result<Option<Item>, ApiError> {
        let path = endpoint("/item", &[("type", kind.as_str()), ("id", id)]);
        match self.call(&path, Method::Get, None).await {
            Ok(mut value) => Self::field(&mut value, "item"),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn latest(&self, limit: usize) -> Result<Vec<Item>, ApiError> {
        let limit = limit.to_string();
        let path = endpoint("/latest", &[("limit", &limit)]);
        let mut value = self.call(&path, Method::Get, None).await?;
        Self::field(&mut value, "items")
    }

    pub async fn cover(&self) -> Result<Option<Cover>, ApiError> {
        let mut value = self.call("/cover", Method::Get, None).await?;
        Self::field(&mut value, "cover")
    }

    pub async fn update_cover(&self, payload: &CoverPayload) -> Result<Cover, ApiError> {
        let body = Self::to_body(payload)?;
        let mut value = self.call("/updateCover", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "cover")
    }

    /// Upload a `data:` URL; returns the server-relative URL of the stored file.
    pub async fn upload_image(
        &self,
        filename: &str,
        data_url: &str,
        mime_type: &str,
    ) -> Result<String, ApiError> {
        let body = json!({ "filename": filename, "data": data_url, "mimeType": mime_type });
        let mut value = self.call("/uploadImage", Method::Post, Some(&body)).await?;
        Self::field(&mut value, "url")
    }

    pub async fn stats(&self, demo_only: bool) -> Result<Stats, ApiError> {
        let path = if demo_only {
            endpoint("/stats", &[("demo", "true")])
        } else {
            "/stats".to_string()
        };
        let mut value = self.call(&path, Method::Get, None).await?;
        Self::field(&mut value, "stats")
    }
}
