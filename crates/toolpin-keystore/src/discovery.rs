//! # Well-Known Key Discovery
//!
//! Fetches a domain's signing key from `https://{domain}/.well-known/schemapin.json`.
//!
//! Discovery is the only blocking operation in the verification path. It is
//! bounded by a timeout and never fails loudly: every failure (transport,
//! status, timeout, malformed body) is logged and collapses to `None`, so the
//! caller's decision path stays deterministic.
//!
//! Successful documents are cached per domain for the configured TTL. The
//! cache lock is released before any request is sent.

use crate::error::DiscoveryError;
use crate::models::WellKnownDocument;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Path of the discovery document relative to the domain root.
pub const WELL_KNOWN_PATH: &str = "/.well-known/schemapin.json";

/// User agent for discovery requests.
const USER_AGENT_VALUE: &str = concat!("toolpin-keystore/", env!("CARGO_PKG_VERSION"));

/// Settings for the discovery client.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Explicit discovery URLs per domain, overriding the well-known path.
    pub well_known_endpoints: BTreeMap<String, String>,

    /// How long a fetched document stays cached.
    pub cache_ttl: Duration,

    /// Reject documents whose advertised key appears in their own revocation list.
    pub revocation_check: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            well_known_endpoints: BTreeMap::new(),
            cache_ttl: Duration::from_secs(3600),
            revocation_check: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedDocument {
    document: WellKnownDocument,
    fetched_at: Instant,
}

/// HTTP client for well-known key documents.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    config: DiscoveryConfig,
    cache: Arc<RwLock<HashMap<String, CachedDocument>>>,
}

impl DiscoveryClient {
    /// Creates a discovery client.
    ///
    /// Falls back to a default `reqwest::Client` if the customised builder
    /// cannot be constructed, since discovery must never make key-store
    /// construction fail.
    pub fn new(config: DiscoveryConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build discovery client, using defaults");
                reqwest::Client::new()
            });

        Self {
            http,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the URL the document for `domain` is fetched from.
    pub fn well_known_url(&self, domain: &str) -> String {
        match self.config.well_known_endpoints.get(domain) {
            Some(url) => url.clone(),
            None => format!("https://{}{}", domain, WELL_KNOWN_PATH),
        }
    }

    /// Discovers the public key advertised by `domain`.
    ///
    /// Returns `None` on any failure; never panics or errors.
    pub async fn discover(&self, domain: &str, timeout: Duration) -> Option<String> {
        match self.fetch_document(domain, timeout).await {
            Ok(document) => Some(document.public_key),
            Err(e) => {
                warn!(domain, error = %e, "key discovery failed");
                None
            }
        }
    }

    /// Fetches (or serves from cache) the discovery document for `domain`.
    pub async fn fetch_document(
        &self,
        domain: &str,
        timeout: Duration,
    ) -> Result<WellKnownDocument, DiscoveryError> {
        if let Some(document) = self.cached(domain).await {
            debug!(domain, "discovery cache hit");
            return Ok(document);
        }

        let document = self.fetch_uncached(domain, timeout).await?;

        if self.config.revocation_check && document.advertises_revoked_key() {
            return Err(DiscoveryError::RevokedKey);
        }

        self.cache.write().await.insert(
            domain.to_string(),
            CachedDocument {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(document)
    }

    /// Drops any cached document for `domain`.
    pub async fn invalidate(&self, domain: &str) {
        self.cache.write().await.remove(domain);
    }

    async fn cached(&self, domain: &str) -> Option<WellKnownDocument> {
        let cache = self.cache.read().await;
        cache
            .get(domain)
            .filter(|entry| entry.fetched_at.elapsed() < self.config.cache_ttl)
            .map(|entry| entry.document.clone())
    }

    async fn fetch_uncached(
        &self,
        domain: &str,
        timeout: Duration,
    ) -> Result<WellKnownDocument, DiscoveryError> {
        let url = self.well_known_url(domain);
        let parsed = reqwest::Url::parse(&url).map_err(|_| DiscoveryError::InvalidUrl {
            url: url.clone(),
        })?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(DiscoveryError::InvalidUrl { url });
        }

        debug!(domain, url = %parsed, "fetching well-known document");

        let request = self.request_document(parsed, timeout);
        let document = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(document)) => document,
            Ok(Err(DiscoveryError::Http(e))) if e.is_timeout() => {
                return Err(DiscoveryError::Timeout)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DiscoveryError::Timeout),
        };

        if document.public_key.trim().is_empty() {
            return Err(DiscoveryError::MalformedDocument(
                "empty public_key".to_string(),
            ));
        }

        Ok(document)
    }

    async fn request_document(
        &self,
        url: reqwest::Url,
        timeout: Duration,
    ) -> Result<WellKnownDocument, DiscoveryError> {
        let response = self.http.get(url).timeout(timeout).send().await?;
        if response.status() != StatusCode::OK {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| DiscoveryError::MalformedDocument(e.to_string()))
    }
}
