use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::transport::{HttpRequest, HttpTransport};

/// Answers "is the backend reachable?" once per detector and remembers the answer.
///
/// Concurrent first callers share a single probe. Bases that are empty or not
/// `http`/`https` are treated as "no backend" without touching the network.
pub struct BackendDetector {
    transport: Arc<dyn HttpTransport>,
    base: String,
    timeout: Duration,
    result: OnceCell<bool>,
}

impl BackendDetector {
    pub fn new(transport: Arc<dyn HttpTransport>, base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            base: base.into().trim_end_matches('/').to_string(),
            timeout,
            result: OnceCell::new(),
        }
    }

    pub async fn has_backend(&self) -> bool {
        *self.result.get_or_init(|| self.probe()).await
    }

    /// The memoized answer, if a probe already ran.
    pub fn cached(&self) -> Option<bool> {
        self.result.get().copied()
    }

    async fn probe(&self) -> bool {
        if !(self.base.starts_with("http://") || self.base.starts_with("https://")) {
            tracing::debug!(base = %self.base, "no http(s) API base, running without backend");
            return false;
        }
        let request = HttpRequest::get(format!("{}/health", self.base)).timeout(self.timeout);
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(Ok(response)) if response.is_success() => {
                tracing::info!(base = %self.base, "backend detected");
                true
            }
            Ok(Ok(response)) => {
                tracing::debug!(status = response.status, "health probe returned non-OK");
                false
            }
            Ok(Err(e)) => {
                tracing::debug!("health probe failed: {e}");
                false
            }
            Err(_) => {
                tracing::debug!("health probe timed out after {:?}", self.timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::testing::{json as respond, ScriptedTransport};
    use crate::transport::TransportError;

    const TIMEOUT: Duration = Duration::from_millis(1200);

    #[tokio::test]
    async fn test_memoizes_first_answer() {
        let transport = ScriptedTransport::new(|_| respond(200, json!({"success": true, "ok": true})));
        let detector = BackendDetector::new(transport.clone(), "http://api.test/", TIMEOUT);
        assert_eq!(detector.cached(), None);

        let (a, b) = tokio::join!(detector.has_backend(), detector.has_backend());
        assert!(a && b);
        assert!(detector.has_backend().await);
        assert_eq!(transport.count(), 1);
        assert_eq!(transport.requests()[0].url, "http://api.test/health");
    }

    #[tokio::test]
    async fn test_non_http_base_skips_network() {
        let transport = ScriptedTransport::new(|_| respond(200, json!({})));
        for base in ["", "file:///var/www", "localhost:3000"] {
            let detector = BackendDetector::new(transport.clone(), base, TIMEOUT);
            assert!(!detector.has_backend().await);
        }
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_failures_mean_no_backend() {
        let down = ScriptedTransport::new(|_| Err(TransportError::Network("refused".into())));
        assert!(!BackendDetector::new(down, "http://api.test", TIMEOUT).has_backend().await);

        let broken = ScriptedTransport::new(|_| respond(503, json!({})));
        assert!(!BackendDetector::new(broken, "http://api.test", TIMEOUT).has_backend().await);

        let slow = ScriptedTransport::new(|_| Err(TransportError::Timeout));
        assert!(!BackendDetector::new(slow, "https://api.test", TIMEOUT).has_backend().await);
    }
}
