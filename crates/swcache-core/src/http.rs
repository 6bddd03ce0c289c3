//! Request and response model shared by every layer
//!
//! These mirror the parts of the Fetch API the caching engine reads: the
//! request URL, method, mode, cache mode, credentials and integrity metadata,
//! and the response status, headers, buffered body and redirect flag.

use crate::error::{WorkerError, WorkerResult};
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::{Origin, Url};

/// Request mode, as in the Fetch API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// HTTP cache mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestCache {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// Credentials mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Response classification, as in the Fetch API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseType {
    Basic,
    Cors,
    #[default]
    Default,
    Error,
    Opaque,
    OpaqueRedirect,
}

/// An HTTP request as seen by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub cache: RequestCache,
    pub credentials: Credentials,
    /// Subresource Integrity metadata, e.g. `sha256-<base64>`
    pub integrity: Option<String>,
}

impl Request {
    /// Create a GET request for the URL
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            cache: RequestCache::default(),
            credentials: Credentials::default(),
            integrity: None,
        }
    }

    /// Parse an absolute URL and create a GET request for it
    pub fn get(url: &str) -> WorkerResult<Self> {
        let parsed = Url::parse(url).map_err(|e| WorkerError::invalid_url(url, e))?;
        Ok(Self::new(parsed))
    }

    /// Create a navigation request
    pub fn navigate(url: Url) -> Self {
        Self::new(url).with_mode(RequestMode::Navigate)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cache(mut self, cache: RequestCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_integrity(mut self, integrity: Option<String>) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Same request, retargeted at another URL
    ///
    /// The method and headers are kept, so a non-GET request stays non-GET
    /// and is still refused by the cache write path. Mode, cache mode,
    /// credentials and integrity are reset to their defaults.
    pub fn with_url(&self, url: Url) -> Self {
        Self {
            url,
            method: self.method.clone(),
            headers: self.headers.clone(),
            ..Self::new(self.url.clone())
        }
    }

    /// Whether this is a top-level navigation
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// URL without its fragment, which is how caches key requests
    pub fn cache_url(&self) -> String {
        strip_fragment(&self.url)
    }
}

/// Return the URL string without its fragment
pub fn strip_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// An HTTP response with a fully buffered body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code; 0 for opaque and network-error responses
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL the response was served from, if known
    pub url: Option<Url>,
    pub redirected: bool,
    pub response_type: ResponseType,
}

impl Response {
    /// Create a default-typed response with the status and body
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HeaderMap::new(),
            body: body.into(),
            url: None,
            redirected: false,
            response_type: ResponseType::Default,
        }
    }

    /// A 200 OK response with the body
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body).with_status_text("OK")
    }

    /// A network-error response
    pub fn error() -> Self {
        Self {
            response_type: ResponseType::Error,
            ..Self::new(0, Bytes::new())
        }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// True for 2xx statuses
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for network-error responses
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Approximate stored size, used by quota accounting
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        self.body.len() + headers
    }
}

/// Status, status text and headers of a response being copied
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
}

/// Copy a same-origin response, optionally adjusting its init
///
/// The copy drops the `redirected` flag and the original URL, which lets a
/// redirected response be served for navigations. Bodies are always buffered,
/// so the copy shares the body bytes with the original.
pub fn copy_response(
    response: &Response,
    scope_origin: &Origin,
    modifier: Option<&dyn Fn(ResponseInit) -> ResponseInit>,
) -> WorkerResult<Response> {
    let origin = response.url.as_ref().map(Url::origin);
    if origin.as_ref() != Some(scope_origin) {
        return Err(WorkerError::CrossOriginCopyResponse {
            origin: origin.map_or_else(|| "null".to_string(), |o| o.ascii_serialization()),
        });
    }

    let init = ResponseInit {
        status: response.status,
        status_text: response.status_text.clone(),
        headers: response.headers.clone(),
    };
    let init = match modifier {
        Some(modify) => modify(init),
        None => init,
    };

    Ok(Response {
        status: init.status,
        status_text: init.status_text,
        headers: init.headers,
        body: response.body.clone(),
        url: None,
        redirected: false,
        response_type: ResponseType::Default,
    })
}

/// Options applied to outgoing network requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Extra headers added to every request
    pub headers: HeaderMap,
    /// Per-request timeout, overriding the fetcher's default
    pub timeout: Option<Duration>,
}

/// Serializable request description, used in worker messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInit {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub mode: Option<RequestMode>,
    #[serde(default)]
    pub cache: Option<RequestCache>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RequestInit {
    /// Build a request for the URL using these options
    pub fn into_request(self, url: Url) -> WorkerResult<Request> {
        let mut request = Request::new(url);
        if let Some(method) = self.method {
            request.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|e| WorkerError::Message(format!("invalid method '{method}': {e}")))?;
        }
        if let Some(mode) = self.mode {
            request.mode = mode;
        }
        if let Some(cache) = self.cache {
            request.cache = cache;
        }
        if let Some(credentials) = self.credentials {
            request.credentials = credentials;
        }
        request.integrity = self.integrity;
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WorkerError::Message(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| WorkerError::Message(format!("invalid header value: {e}")))?;
            request.headers.insert(name, value);
        }
        Ok(request)
    }
}
