//! Azure Speech access-token cache
//!
//! Azure issues short-lived bearer tokens from a regional `issueToken`
//! endpoint; each token is valid for ten minutes. The cache is process-wide
//! state with explicit init/expire/refresh rules, shared by the STT and TTS
//! clients and invisible to the rest of the engine.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Refresh a minute before the service-side ten-minute expiry
const TOKEN_LIFETIME: Duration = Duration::from_secs(9 * 60);

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Wall-clock-expiring bearer token cache
pub(crate) struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

/// Process-wide cache instance
pub(crate) static AZURE_TOKEN: TokenCache = TokenCache::new();

impl TokenCache {
    pub(crate) const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Return a fresh bearer token, refreshing it if expired.
    ///
    /// Concurrent refreshes are harmless: last writer wins and every value
    /// written is valid.
    pub(crate) async fn bearer(
        &self,
        client: &reqwest::Client,
        region: &str,
        subscription_key: &str,
    ) -> Result<String> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let url = format!("https://{region}.api.cognitive.microsoft.com/sts/v1.0/issueToken");
        let response = client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", subscription_key)
            .header("Content-Length", "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Config(format!(
                "token endpoint error {status}: {body}"
            )));
        }

        let value = response.text().await?;
        tracing::debug!(region, "access token refreshed");
        self.store(value.clone());
        Ok(value)
    }

    /// Drop the cached token so the next call refreshes
    pub(crate) fn expire(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    fn fresh_token(&self) -> Option<String> {
        let slot = self.slot.lock().ok()?;
        slot.as_ref()
            .filter(|t| t.fetched_at.elapsed() < TOKEN_LIFETIME)
            .map(|t| t.value.clone())
    }

    fn store(&self, value: String) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(CachedToken {
                value,
                fetched_at: Instant::now(),
            });
        }
    }
}
