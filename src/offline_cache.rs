//! Offline availability for the application shell.
//!
//! Install pre-populates the current generation, activate drops every other
//! generation, and each same-origin GET goes to the network first and falls
//! back to the stored copy. Cached assets may be stale after a network
//! failure; nothing here tries to detect that.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tokio::sync::Mutex;
use url::Url;

use crate::error::CacheError;
pub use crate::storage::CachedResponse;
use crate::storage::CacheStore;

pub const CACHE_NAME: &str = "nexus-chat-v1";

/// Paths of the application shell, relative to the origin.
pub const SHELL_ASSETS: &[&str] = &[
    "/",
    "/static/css/style.css",
    "/static/js/app.js",
    "/static/js/chat.js",
    "/static/img/default-avatar.svg",
];

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Network side of the cache.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<CachedResponse, CacheError>> + Send;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CacheError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| CacheError::Network {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<CachedResponse, CacheError> {
        let network = |e: reqwest::Error| CacheError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self.http.get(url.clone()).send().await.map_err(network)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(network)?.to_vec();
        Ok(CachedResponse {
            status,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: Method,
    pub url: Url,
}

impl AssetRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Not ours; the caller performs the request unmodified.
    Passthrough,
    Respond(CachedResponse),
}

pub struct AssetCache<F> {
    origin: Url,
    generation: String,
    store: Mutex<CacheStore>,
    fetcher: F,
}

impl<F: Fetch> AssetCache<F> {
    pub fn new(origin: Url, store: CacheStore, fetcher: F) -> Self {
        Self::with_generation(origin, CACHE_NAME, store, fetcher)
    }

    pub fn with_generation(
        origin: Url,
        generation: impl Into<String>,
        store: CacheStore,
        fetcher: F,
    ) -> Self {
        Self {
            origin,
            generation: generation.into(),
            store: Mutex::new(store),
            fetcher,
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Fetch every shell asset into the current generation. One failed fetch
    /// (network error or non-2xx) aborts the install and stores nothing.
    pub async fn install(&self) -> Result<usize, CacheError> {
        let mut entries = Vec::with_capacity(SHELL_ASSETS.len());
        for path in SHELL_ASSETS {
            let url = self.origin.join(path)?;
            let response = self.fetcher.fetch(&url).await?;
            if !response.is_success() {
                return Err(CacheError::Network {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            entries.push((url.to_string(), response));
        }

        let mut store = self.store.lock().await;
        store.put_all(&self.generation, &entries)?;
        info!(
            "installed {} shell assets into {}",
            entries.len(),
            self.generation
        );
        Ok(entries.len())
    }

    /// Delete every generation except the current one. Returns the names
    /// removed.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let store = self.store.lock().await;
        store.open_generation(&self.generation)?;
        let mut removed = Vec::new();
        for name in store.generations()? {
            if name != self.generation {
                store.delete_generation(&name)?;
                removed.push(name);
            }
        }
        if !removed.is_empty() {
            info!("activated {}; removed {:?}", self.generation, removed);
        }
        Ok(removed)
    }

    /// Network first, cache on failure. Only same-origin GETs are handled.
    pub async fn handle(&self, request: &AssetRequest) -> Result<Interception, CacheError> {
        if request.method != Method::GET || request.url.origin() != self.origin.origin() {
            return Ok(Interception::Passthrough);
        }

        let key = request.url.to_string();
        match self.fetcher.fetch(&request.url).await {
            Ok(response) => {
                if response.is_success() {
                    let store = self.store.lock().await;
                    if let Err(e) = store.put(&self.generation, &key, &response) {
                        warn!("could not cache {key}: {e}");
                    }
                }
                Ok(Interception::Respond(response))
            }
            Err(err) => {
                debug!("network failed for {key}: {err}");
                let store = self.store.lock().await;
                match store.lookup(&self.generation, &key)? {
                    Some(cached) => Ok(Interception::Respond(cached)),
                    None => Err(CacheError::Unavailable(key)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Serves canned bodies; urls not in the map fail like a dropped network.
    #[derive(Default)]
    struct FakeNetwork {
        responses: StdMutex<HashMap<String, CachedResponse>>,
    }

    impl FakeNetwork {
        fn serve(&self, url: &str, status: u16, body: &str) {
            self.responses.lock().unwrap().insert(
                url.to_string(),
                CachedResponse {
                    status,
                    content_type: Some("text/plain".to_string()),
                    body: body.as_bytes().to_vec(),
                },
            );
        }

        fn serve_shell(&self) {
            for path in SHELL_ASSETS {
                self.serve(&format!("http://chat.local{path}"), 200, path);
            }
        }

        fn go_offline(&self) {
            self.responses.lock().unwrap().clear();
        }
    }

    impl Fetch for &FakeNetwork {
        async fn fetch(&self, url: &Url) -> Result<CachedResponse, CacheError> {
            self.responses
                .lock()
                .unwrap()
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| CacheError::Network {
                    url: url.to_string(),
                    reason: "offline".to_string(),
                })
        }
    }

    fn origin() -> Url {
        Url::parse("http://chat.local/").unwrap()
    }

    fn url(path: &str) -> Url {
        origin().join(path).unwrap()
    }

    fn cache(network: &FakeNetwork) -> AssetCache<&FakeNetwork> {
        AssetCache::new(origin(), CacheStore::new(":memory:").unwrap(), network)
    }

    #[tokio::test]
    async fn install_stores_the_whole_shell() {
        let network = FakeNetwork::default();
        network.serve_shell();
        let cache = cache(&network);

        assert_eq!(cache.install().await.unwrap(), SHELL_ASSETS.len());
        network.go_offline();
        let served = cache
            .handle(&AssetRequest::get(url("/static/js/chat.js")))
            .await
            .unwrap();
        match served {
            Interception::Respond(response) => assert_eq!(response.body, b"/static/js/chat.js"),
            other => panic!("expected cached response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let network = FakeNetwork::default();
        network.serve_shell();
        network.serve("http://chat.local/static/js/app.js", 404, "missing");
        let cache = cache(&network);

        assert!(cache.install().await.is_err());
        network.go_offline();
        assert!(matches!(
            cache.handle(&AssetRequest::get(url("/"))).await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn network_first_then_fallback() {
        let network = FakeNetwork::default();
        network.serve("http://chat.local/static/css/style.css", 200, "v1");
        let cache = cache(&network);
        let request = AssetRequest::get(url("/static/css/style.css"));

        cache.handle(&request).await.unwrap();
        network.serve("http://chat.local/static/css/style.css", 200, "v2");
        match cache.handle(&request).await.unwrap() {
            Interception::Respond(response) => assert_eq!(response.body, b"v2"),
            other => panic!("unexpected {other:?}"),
        }

        network.go_offline();
        match cache.handle(&request).await.unwrap() {
            Interception::Respond(response) => assert_eq!(response.body, b"v2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_responses_are_returned_but_not_stored() {
        let network = FakeNetwork::default();
        network.serve("http://chat.local/gone", 500, "boom");
        let cache = cache(&network);
        let request = AssetRequest::get(url("/gone"));

        match cache.handle(&request).await.unwrap() {
            Interception::Respond(response) => assert_eq!(response.status, 500),
            other => panic!("unexpected {other:?}"),
        }
        network.go_offline();
        assert!(matches!(
            cache.handle(&request).await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn non_get_and_cross_origin_pass_through() {
        let network = FakeNetwork::default();
        let cache = cache(&network);

        let post = AssetRequest {
            method: Method::POST,
            url: url("/chat/12/upload/"),
        };
        assert_eq!(cache.handle(&post).await.unwrap(), Interception::Passthrough);

        let fonts = AssetRequest::get(Url::parse("https://fonts.googleapis.com/icon").unwrap());
        assert_eq!(cache.handle(&fonts).await.unwrap(), Interception::Passthrough);
    }

    #[tokio::test]
    async fn activate_keeps_only_the_current_generation() {
        let network = FakeNetwork::default();
        let store = CacheStore::new(":memory:").unwrap();
        store
            .put(
                "nexus-chat-v0",
                "http://chat.local/",
                &CachedResponse {
                    status: 200,
                    content_type: None,
                    body: b"old".to_vec(),
                },
            )
            .unwrap();
        let cache = AssetCache::new(origin(), store, &network);

        assert_eq!(cache.activate().await.unwrap(), vec!["nexus-chat-v0"]);
        assert!(cache.activate().await.unwrap().is_empty());
    }
}
