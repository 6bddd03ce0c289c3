//! Network access
//!
//! [`Fetcher`] is the seam between the caching engine and the network stack.
//! [`HttpFetcher`] implements it on top of reqwest and verifies Subresource
//! Integrity metadata the way a browser does.

use crate::{
    config::HttpFetcherConfig,
    error::{WorkerError, WorkerResult},
    http::{FetchOptions, Request, RequestCache, RequestMode, Response, ResponseType},
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderValue, PRAGMA};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Once;
use url::Origin;

/// Performs network requests on behalf of strategies
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request, options: Option<&FetchOptions>)
    -> WorkerResult<Response>;
}

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring crypto provider for rustls once per process
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Check a body against Subresource Integrity metadata
///
/// The metadata is a whitespace-separated list of `algorithm-base64digest`
/// tokens. Only the strongest algorithm present is considered, and the body
/// passes if any token of that algorithm matches. Metadata with no supported
/// algorithm passes, as browsers do.
pub fn verify_integrity(metadata: &str, body: &[u8]) -> bool {
    let mut tokens: Vec<(u8, &str, &str)> = metadata
        .split_whitespace()
        .filter_map(|token| {
            let token = token.split('?').next().unwrap_or(token);
            let (algorithm, digest) = token.split_once('-')?;
            let strength = match algorithm {
                "sha256" => 1,
                "sha384" => 2,
                "sha512" => 3,
                _ => return None,
            };
            Some((strength, algorithm, digest))
        })
        .collect();

    let Some(strongest) = tokens.iter().map(|(strength, _, _)| *strength).max() else {
        return true;
    };
    tokens.retain(|(strength, _, _)| *strength == strongest);

    tokens.iter().any(|(_, algorithm, expected)| {
        let actual = match *algorithm {
            "sha256" => STANDARD.encode(Sha256::digest(body)),
            "sha384" => STANDARD.encode(Sha384::digest(body)),
            _ => STANDARD.encode(Sha512::digest(body)),
        };
        actual == *expected
    })
}

/// reqwest-backed network fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
    /// Origin of the worker, used to classify responses
    origin: Option<Origin>,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> WorkerResult<Self> {
        config
            .validate()
            .map_err(WorkerError::InvalidConfiguration)?;
        ensure_crypto_provider();

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            origin: None,
        })
    }

    /// Classify responses relative to the worker's origin
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    fn is_same_origin(&self, request: &Request) -> bool {
        self.origin
            .as_ref()
            .is_none_or(|origin| *origin == request.url.origin())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &Request,
        options: Option<&FetchOptions>,
    ) -> WorkerResult<Response> {
        tracing::debug!(url = %request.url, method = %request.method, "network request");

        let mut headers = request.headers.clone();
        if let Some(options) = options {
            headers.extend(options.headers.clone());
        }
        if matches!(request.cache, RequestCache::Reload | RequestCache::NoCache) {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        } else if request.cache == RequestCache::NoStore {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }

        let timeout = options
            .and_then(|o| o.timeout)
            .unwrap_or(self.config.request_timeout);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await?;

        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let response_headers = response.headers().clone();
        let body: Bytes = response.bytes().await?;

        if let Some(integrity) = request.integrity.as_deref()
            && !verify_integrity(integrity, &body)
        {
            tracing::warn!(url = %request.url, "integrity check failed");
            return Err(WorkerError::Network(format!(
                "integrity metadata '{integrity}' does not match the response for '{}'",
                request.url
            )));
        }

        if !self.is_same_origin(request) && request.mode == RequestMode::NoCors {
            return Ok(Response::new(0, Bytes::new()).with_type(ResponseType::Opaque));
        }

        let response_type = if self.is_same_origin(request) {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };

        Ok(Response {
            status: status.as_u16(),
            status_text,
            headers: response_headers,
            body,
            url: Some(final_url),
            redirected,
            response_type,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sri(body: &[u8]) -> String {
        format!("sha256-{}", STANDARD.encode(Sha256::digest(body)))
    }

    #[test]
    fn test_verify_integrity() {
        let body = b"console.log('hi');";
        assert!(verify_integrity(&sri(body), body));
        assert!(!verify_integrity(&sri(b"other"), body));
        // Unknown algorithms are ignored
        assert!(verify_integrity("md5-abc", body));
        // Strongest algorithm wins
        let sha512 = format!("sha512-{}", STANDARD.encode(Sha512::digest(b"other")));
        assert!(!verify_integrity(&format!("{} {sha512}", sri(body)), body));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("app"))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(HttpFetcherConfig::default())
            .unwrap()
            .with_origin(base.origin());
        let request = Request::new(base.join("/app.js").unwrap());

        let response = fetcher.fetch(&request, None).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "app");
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(!response.redirected);
    }

    #[tokio::test]
    async fn test_reload_sends_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fresh"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let request = Request::get(&format!("{}/fresh", server.uri()))
            .unwrap()
            .with_cache(RequestCache::Reload);

        let response = fetcher.fetch(&request, None).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_redirect_is_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let request = Request::get(&format!("{}/old", server.uri())).unwrap();
        let response = fetcher.fetch(&request, None).await.unwrap();
        assert!(response.redirected);
        assert_eq!(response.url.unwrap().path(), "/new");
    }

    #[tokio::test]
    async fn test_integrity_mismatch_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("tampered"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let request = Request::get(&format!("{}/lib.js", server.uri()))
            .unwrap()
            .with_integrity(Some(sri(b"original")));

        let err = fetcher.fetch(&request, None).await.unwrap_err();
        assert_eq!(err.kind(), "network-error");

        let request = request.with_integrity(Some(sri(b"tampered")));
        assert!(fetcher.fetch(&request, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let request = Request::get("http://127.0.0.1:9/unreachable").unwrap();
        let err = fetcher.fetch(&request, None).await.unwrap_err();
        assert!(matches!(err, WorkerError::Network(_)));
    }
}
