//! Turns document references into bytes.

use crate::fetch::{FetchError, HttpFetcher};
use crate::reference::{DocumentReference, ReferenceError};
use crate::store::{ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifetime of signed URLs issued for storage paths.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// How storage paths are retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStrategy {
    /// Authorized download straight from the bucket.
    #[default]
    Download,

    /// Issue a time-limited signed URL, then fetch it over plain HTTP.
    SignedUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("document not found: {reference}")]
    NotFound { reference: String },

    #[error("access to {reference} denied: {reason}")]
    Forbidden { reference: String, reason: String },

    #[error("network error while fetching {reference}: {message}")]
    Network { reference: String, message: String },

    #[error("storage error while fetching {reference}: {message}")]
    Storage { reference: String, message: String },

    #[error("document {reference} is empty")]
    EmptyBody { reference: String },
}

impl ResolveError {
    fn from_store(reference: &DocumentReference, error: StoreError) -> Self {
        let reference = reference.to_string();
        match error {
            StoreError::NotFound { .. } => ResolveError::NotFound { reference },
            StoreError::Forbidden { reason, .. } => ResolveError::Forbidden { reference, reason },
            StoreError::Network(message) => ResolveError::Network { reference, message },
            StoreError::Other(message) => ResolveError::Storage { reference, message },
        }
    }

    fn from_fetch(reference: &DocumentReference, error: FetchError) -> Self {
        let reference = reference.to_string();
        match error {
            FetchError::Status { status: 404 | 410, .. } => ResolveError::NotFound { reference },
            FetchError::Status { status: status @ (401 | 403), body } => {
                ResolveError::Forbidden { reference, reason: format!("HTTP {status}: {body}") }
            }
            other => ResolveError::Network { reference, message: other.to_string() },
        }
    }
}

/// Fetches document binaries for references.
///
/// Holds no state between calls and never retries.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn HttpFetcher>,
    strategy: ResolveStrategy,
    signed_url_ttl: Duration,
}

impl Resolver {
    pub fn new(store: Arc<dyn ObjectStore>, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            store,
            fetcher,
            strategy: ResolveStrategy::default(),
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }

    pub fn with_strategy(mut self, strategy: ResolveStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn strategy(&self) -> ResolveStrategy {
        self.strategy
    }

    /// Retrieve the complete binary for `reference`.
    pub fn resolve(&self, reference: &DocumentReference) -> Result<Vec<u8>, ResolveError> {
        let bytes = match reference {
            DocumentReference::Url(url) => {
                log::debug!("fetching document from {url}");
                self.fetcher.get(url, &[]).map_err(|e| ResolveError::from_fetch(reference, e))?
            }
            DocumentReference::StoragePath(path) => match self.strategy {
                ResolveStrategy::Download => {
                    log::debug!("downloading {path} from storage");
                    self.store.download(path).map_err(|e| ResolveError::from_store(reference, e))?
                }
                ResolveStrategy::SignedUrl => {
                    let url = self
                        .store
                        .create_signed_url(path, self.signed_url_ttl)
                        .map_err(|e| ResolveError::from_store(reference, e))?;
                    log::debug!("fetching {path} through a signed URL");
                    self.fetcher.get(&url, &[]).map_err(|e| ResolveError::from_fetch(reference, e))?
                }
            },
        };

        if bytes.is_empty() {
            return Err(ResolveError::EmptyBody { reference: reference.to_string() });
        }

        log::info!("resolved {reference} ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Parse and resolve in one step.
    pub fn resolve_str(&self, reference: &str) -> Result<Vec<u8>, ResolveError> {
        let reference = DocumentReference::parse(reference)?;
        self.resolve(&reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn resolver(store: &Arc<MemoryStore>) -> Resolver {
        Resolver::new(store.clone(), store.clone())
    }

    #[test]
    fn storage_paths_download_by_default() {
        let store = Arc::new(MemoryStore::new());
        store.insert("magazines/issue-12.pdf", b"%PDF".to_vec());

        let bytes = resolver(&store).resolve_str("/magazines/issue-12.pdf").unwrap();
        assert_eq!(bytes, b"%PDF");
        assert_eq!(store.download_calls(), 1);
        assert_eq!(store.signed_url_calls(), 0);
    }

    #[test]
    fn signed_url_strategy_fetches_the_issued_url() {
        let store = Arc::new(MemoryStore::new());
        store.insert("magazines/issue-12.pdf", b"%PDF".to_vec());

        let resolver = resolver(&store).with_strategy(ResolveStrategy::SignedUrl);
        let bytes = resolver.resolve_str("magazines/issue-12.pdf").unwrap();

        assert_eq!(bytes, b"%PDF");
        assert_eq!(store.signed_url_calls(), 1);
        assert_eq!(store.fetch_calls(), 1);
        assert_eq!(store.download_calls(), 0);
    }

    #[test]
    fn absolute_urls_bypass_the_store() {
        let store = Arc::new(MemoryStore::new());
        store.insert_url("https://cdn.example.com/a.pdf", b"%PDF".to_vec());

        let bytes = resolver(&store).resolve_str("https://cdn.example.com/a.pdf").unwrap();
        assert_eq!(bytes, b"%PDF");
        assert_eq!(store.download_calls(), 0);
        assert_eq!(store.fetch_calls(), 1);
    }

    #[test]
    fn missing_objects_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(&store).resolve_str("magazines/missing.pdf").unwrap_err();
        assert_eq!(err, ResolveError::NotFound { reference: "magazines/missing.pdf".into() });

        let err = resolver(&store).resolve_str("https://cdn.example.com/missing.pdf").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn empty_reference_makes_no_calls() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(&store).resolve_str("").unwrap_err();
        assert_eq!(err, ResolveError::Reference(ReferenceError::Empty));
        assert_eq!(store.total_calls(), 0);
    }

    #[test]
    fn empty_bodies_are_errors() {
        let store = Arc::new(MemoryStore::new());
        store.insert("magazines/blank.pdf", Vec::new());
        let err = resolver(&store).resolve_str("magazines/blank.pdf").unwrap_err();
        assert!(matches!(err, ResolveError::EmptyBody { .. }));
    }

    #[test]
    fn strategy_names_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: ResolveStrategy,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"strategy":"signed-url"}"#).unwrap();
        assert_eq!(parsed.strategy, ResolveStrategy::SignedUrl);
    }
}
