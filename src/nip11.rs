//! NIP-11 relay information probing and capability checks.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

/// Accept header requesting the relay information document.
pub const RELAY_INFO_ACCEPT: &str = "application/nostr+json";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The slice of the NIP-11 document this crate cares about.
#[derive(Debug, Deserialize)]
struct RelayInfo {
    #[serde(default)]
    supported_nips: Option<Vec<u16>>,
}

/// Capability lookup injected into the fetcher; answers whether a relay
/// implements every required NIP.
#[async_trait]
pub trait RelayCapChecker: Send + Sync {
    async fn relay_supports_nips(&self, url: &str, required: &[u16]) -> bool;
}

/// Probes relays over HTTP and memoizes their NIP sets per URL. Failed
/// probes are cached as an empty set, so a flaky relay is asked once per
/// checker lifetime.
pub struct DefaultCapChecker {
    http: reqwest::Client,
    cache: Mutex<HashMap<String, HashSet<u16>>>,
}

impl DefaultCapChecker {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn probe(&self, url: &str) -> HashSet<u16> {
        let Some(probe_url) = info_document_url(url) else {
            tracing::warn!(relay = %url, "cannot derive nip-11 url");
            return HashSet::new();
        };
        let response = self
            .http
            .get(probe_url)
            .header(reqwest::header::ACCEPT, RELAY_INFO_ACCEPT)
            .send()
            .await;
        match response {
            Ok(resp) => match resp.json::<RelayInfo>().await {
                Ok(info) => info.supported_nips.unwrap_or_default().into_iter().collect(),
                Err(err) => {
                    tracing::warn!(relay = %url, error = %err, "nip-11 document unreadable");
                    HashSet::new()
                }
            },
            Err(err) => {
                tracing::warn!(relay = %url, error = %err, "nip-11 probe failed");
                HashSet::new()
            }
        }
    }
}

impl Default for DefaultCapChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayCapChecker for DefaultCapChecker {
    async fn relay_supports_nips(&self, url: &str, required: &[u16]) -> bool {
        if required.is_empty() {
            return true;
        }
        let mut cache = self.cache.lock().await;
        if !cache.contains_key(url) {
            let nips = self.probe(url).await;
            cache.insert(url.to_string(), nips);
        }
        let nips = &cache[url];
        required.iter().all(|nip| nips.contains(nip))
    }
}

/// Map a relay websocket URL onto its information-document URL:
/// `wss -> https`, `ws -> http`, same authority and path.
fn info_document_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let scheme = match parsed.scheme() {
        "wss" => "https",
        "ws" => "http",
        _ => return None,
    };
    parsed.set_scheme(scheme).ok()?;
    Some(parsed.to_string())
}
