//! Object stores holding magazine binaries.

use crate::fetch::{FetchError, HttpFetcher, UreqFetcher};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Bucket the publishing back office uploads magazine PDFs and covers to.
pub const MAGAZINES_BUCKET: &str = "magazines-storage";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("access to {path} denied: {reason}")]
    Forbidden { path: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Other(String),
}

/// Storage bucket access: direct download or a time-limited signed URL.
pub trait ObjectStore: Send + Sync {
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StoreError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        (**self).download(path)
    }

    fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StoreError> {
        (**self).create_signed_url(path, ttl)
    }
}

/// REST client for a hosted storage bucket.
pub struct SupabaseStorage<F: HttpFetcher = UreqFetcher> {
    base_url: String,
    bucket: String,
    api_key: String,
    fetcher: F,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl SupabaseStorage<UreqFetcher> {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_fetcher(base_url, bucket, api_key, UreqFetcher::default())
    }
}

impl<F: HttpFetcher> SupabaseStorage<F> {
    pub fn with_fetcher(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
        fetcher: F,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, bucket: bucket.into(), api_key: api_key.into(), fetcher }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// URL of an object in a public bucket. No request is made.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    fn object_url(&self, kind: &str, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match kind {
            "" => format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path),
            kind => format!("{}/storage/v1/object/{}/{}/{}", self.base_url, kind, self.bucket, path),
        }
    }

    fn map_error(path: &str, error: FetchError) -> StoreError {
        match error {
            FetchError::Status { status: 404, .. } => StoreError::NotFound { path: path.to_string() },
            // The storage API reports missing objects as 400 with a "not found" message.
            FetchError::Status { status: 400, body } if body.to_ascii_lowercase().contains("not found") => {
                StoreError::NotFound { path: path.to_string() }
            }
            FetchError::Status { status: status @ (401 | 403), body } => StoreError::Forbidden {
                path: path.to_string(),
                reason: format!("HTTP {status}: {body}"),
            },
            FetchError::Status { status, body } => StoreError::Other(format!("HTTP {status}: {body}")),
            FetchError::Transport(message) => StoreError::Network(message),
            FetchError::Body(message) => StoreError::Network(message),
        }
    }
}

impl<F: HttpFetcher> ObjectStore for SupabaseStorage<F> {
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let bearer = format!("Bearer {}", self.api_key);
        let headers = [("apikey", self.api_key.as_str()), ("Authorization", bearer.as_str())];
        self.fetcher
            .get(&self.object_url("", path), &headers)
            .map_err(|err| Self::map_error(path, err))
    }

    fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StoreError> {
        let bearer = format!("Bearer {}", self.api_key);
        let headers = [("apikey", self.api_key.as_str()), ("Authorization", bearer.as_str())];
        let body = serde_json::json!({ "expiresIn": ttl.as_secs() }).to_string();

        let response = self
            .fetcher
            .post_json(&self.object_url("sign", path), &headers, &body)
            .map_err(|err| Self::map_error(path, err))?;

        let parsed: SignedUrlResponse = serde_json::from_slice(&response)
            .map_err(|e| StoreError::Other(format!("invalid signed URL response: {e}")))?;

        // The API returns a path relative to the storage endpoint.
        if parsed.signed_url.starts_with("http://") || parsed.signed_url.starts_with("https://") {
            Ok(parsed.signed_url)
        } else {
            let relative = parsed.signed_url.trim_start_matches('/');
            Ok(format!("{}/storage/v1/{}", self.base_url, relative))
        }
    }
}

/// Local directory standing in for a bucket: object paths resolve under `root`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for DirectoryStore {
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.root.join(path.trim_start_matches('/'));
        fs::read(&full).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path: path.to_string() },
            io::ErrorKind::PermissionDenied => {
                StoreError::Forbidden { path: path.to_string(), reason: err.to_string() }
            }
            _ => StoreError::Other(format!("{}: {err}", full.display())),
        })
    }

    fn create_signed_url(&self, path: &str, _ttl: Duration) -> Result<String, StoreError> {
        Err(StoreError::Other(format!("signed URLs are not available for local object {path}")))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;

#[cfg(any(test, feature = "test-support"))]
mod memory {
    use super::{ObjectStore, StoreError};
    use crate::fetch::{FetchError, HttpFetcher};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    const SIGNED_PREFIX: &str = "memory://signed/";

    /// In-memory bucket and HTTP endpoint that counts every call.
    ///
    /// Signed URLs it issues are served by its own [`HttpFetcher`] impl.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        urls: Mutex<HashMap<String, Vec<u8>>>,
        downloads: AtomicUsize,
        signed_urls: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store an object under a bucket path.
        pub fn insert(&self, path: &str, bytes: Vec<u8>) {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.trim_start_matches('/').to_string(), bytes);
        }

        /// Serve `bytes` for an absolute URL.
        pub fn insert_url(&self, url: &str, bytes: Vec<u8>) {
            self.urls.lock().unwrap_or_else(PoisonError::into_inner).insert(url.to_string(), bytes);
        }

        pub fn download_calls(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }

        pub fn signed_url_calls(&self) -> usize {
            self.signed_urls.load(Ordering::SeqCst)
        }

        pub fn fetch_calls(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        /// Every retrieval call of any kind.
        pub fn total_calls(&self) -> usize {
            self.download_calls() + self.signed_url_calls() + self.fetch_calls()
        }

        fn object(&self, path: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path.trim_start_matches('/'))
                .cloned()
        }
    }

    impl ObjectStore for MemoryStore {
        fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.object(path).ok_or_else(|| StoreError::NotFound { path: path.to_string() })
        }

        fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StoreError> {
            self.signed_urls.fetch_add(1, Ordering::SeqCst);
            if self.object(path).is_none() {
                return Err(StoreError::NotFound { path: path.to_string() });
            }
            Ok(format!("{SIGNED_PREFIX}{}?expires={}", path.trim_start_matches('/'), ttl.as_secs()))
        }
    }

    impl HttpFetcher for MemoryStore {
        fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(bytes) = self.urls.lock().unwrap_or_else(PoisonError::into_inner).get(url) {
                return Ok(bytes.clone());
            }
            let signed = url
                .strip_prefix(SIGNED_PREFIX)
                .and_then(|rest| rest.split('?').next())
                .and_then(|path| self.object(path));
            signed.ok_or_else(|| FetchError::Status { status: 404, body: "not found".into() })
        }

        fn post_json(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            _body: &str,
        ) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status { status: 405, body: format!("POST not supported for {url}") })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and replays canned responses.
    #[derive(Default)]
    struct ScriptedFetcher {
        requests: Mutex<Vec<(String, String, Vec<(String, String)>, Option<String>)>>,
        response: Mutex<Option<Result<Vec<u8>, FetchError>>>,
    }

    impl ScriptedFetcher {
        fn answering(response: Result<Vec<u8>, FetchError>) -> Self {
            Self { response: Mutex::new(Some(response)), ..Self::default() }
        }

        fn record(&self, method: &str, url: &str, headers: &[(&str, &str)], body: Option<&str>) {
            let headers = headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            self.requests.lock().unwrap().push((
                method.to_string(),
                url.to_string(),
                headers,
                body.map(str::to_string),
            ));
        }

        fn reply(&self) -> Result<Vec<u8>, FetchError> {
            self.response.lock().unwrap().take().unwrap_or(Ok(Vec::new()))
        }
    }

    impl HttpFetcher for ScriptedFetcher {
        fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, FetchError> {
            self.record("GET", url, headers, None);
            self.reply()
        }

        fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &str,
        ) -> Result<Vec<u8>, FetchError> {
            self.record("POST", url, headers, Some(body));
            self.reply()
        }
    }

    fn storage(fetcher: ScriptedFetcher) -> SupabaseStorage<ScriptedFetcher> {
        SupabaseStorage::with_fetcher("https://project.supabase.co/", MAGAZINES_BUCKET, "anon-key", fetcher)
    }

    #[test]
    fn download_hits_object_endpoint_with_auth_headers() {
        let store = storage(ScriptedFetcher::answering(Ok(b"%PDF-1.5".to_vec())));
        let bytes = store.download("/magazines/issue-12.pdf").unwrap();
        assert_eq!(bytes, b"%PDF-1.5");

        let requests = store.fetcher.requests.lock().unwrap();
        let (method, url, headers, _) = &requests[0];
        assert_eq!(method, "GET");
        assert_eq!(
            url,
            "https://project.supabase.co/storage/v1/object/magazines-storage/magazines/issue-12.pdf"
        );
        assert!(headers.contains(&("apikey".into(), "anon-key".into())));
        assert!(headers.contains(&("Authorization".into(), "Bearer anon-key".into())));
    }

    #[test]
    fn signed_url_is_made_absolute() {
        let response = br#"{"signedURL":"/object/sign/magazines-storage/a.pdf?token=t"}"#.to_vec();
        let store = storage(ScriptedFetcher::answering(Ok(response)));

        let url = store.create_signed_url("a.pdf", Duration::from_secs(3600)).unwrap();
        assert_eq!(
            url,
            "https://project.supabase.co/storage/v1/object/sign/magazines-storage/a.pdf?token=t"
        );

        let requests = store.fetcher.requests.lock().unwrap();
        let (method, url, _, body) = &requests[0];
        assert_eq!(method, "POST");
        assert!(url.ends_with("/storage/v1/object/sign/magazines-storage/a.pdf"));
        assert_eq!(body.as_deref(), Some(r#"{"expiresIn":3600}"#));
    }

    #[test]
    fn status_codes_map_to_store_errors() {
        let cases = [
            (404, "", "not-found"),
            (400, r#"{"error":"Object not found"}"#, "not-found"),
            (403, "denied", "forbidden"),
            (401, "", "forbidden"),
            (500, "boom", "other"),
        ];
        for (status, body, expected) in cases {
            let store = storage(ScriptedFetcher::answering(Err(FetchError::Status {
                status,
                body: body.to_string(),
            })));
            let kind = match store.download("x.pdf") {
                Err(StoreError::NotFound { .. }) => "not-found",
                Err(StoreError::Forbidden { .. }) => "forbidden",
                Err(StoreError::Other(_)) => "other",
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(kind, expected, "status {status}");
        }
    }

    #[test]
    fn transport_failures_are_network_errors() {
        let store = storage(ScriptedFetcher::answering(Err(FetchError::Transport("refused".into()))));
        assert_eq!(store.download("x.pdf"), Err(StoreError::Network("refused".into())));
    }

    #[test]
    fn public_url_needs_no_request() {
        let store = storage(ScriptedFetcher::default());
        assert_eq!(
            store.public_url("/covers/issue-1.png"),
            "https://project.supabase.co/storage/v1/object/public/magazines-storage/covers/issue-1.png"
        );
        assert!(store.fetcher.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn directory_store_reads_relative_paths() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        fs::create_dir_all(temp.path().join("magazines")).unwrap();
        fs::write(temp.path().join("magazines/issue-1.pdf"), b"pdf").unwrap();

        let store = DirectoryStore::with_root(temp.path());
        assert_eq!(store.download("/magazines/issue-1.pdf").unwrap(), b"pdf");
        assert!(matches!(store.download("magazines/missing.pdf"), Err(StoreError::NotFound { .. })));
        assert!(store.create_signed_url("magazines/issue-1.pdf", Duration::from_secs(60)).is_err());
    }

    #[test]
    fn memory_store_counts_calls_and_serves_signed_urls() {
        let store = MemoryStore::new();
        store.insert("magazines/a.pdf", b"abc".to_vec());

        let url = store.create_signed_url("magazines/a.pdf", Duration::from_secs(10)).unwrap();
        assert_eq!(store.get(&url, &[]).unwrap(), b"abc");
        assert!(store.download("magazines/b.pdf").is_err());

        assert_eq!(store.signed_url_calls(), 1);
        assert_eq!(store.fetch_calls(), 1);
        assert_eq!(store.download_calls(), 1);
        assert_eq!(store.total_calls(), 3);
    }
}
