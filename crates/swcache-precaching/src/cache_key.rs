//! Manifest entries and the cache keys derived from them
//!
//! An entry without a revision is assumed to carry its version in its URL,
//! so the URL is used as the cache key as-is. An entry with a revision gets
//! a cache key with the revision in a reserved search parameter, which keeps
//! successive versions of an unchanged URL apart in the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swcache_core::{REVISION_SEARCH_PARAM, WorkerError, WorkerResult};
use url::Url;

/// A manifest record with optional revision and integrity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Subresource Integrity metadata checked when the entry is fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl PrecacheEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
            integrity: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }
}

/// One item of a precache manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    /// A URL that already carries its version
    Url(String),
    Entry(PrecacheEntry),
}

impl ManifestEntry {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Entry(entry) => &entry.url,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Entry(entry) => entry.revision.as_deref(),
        }
    }

    /// The revision used for the cache key; an empty one counts as none
    pub fn key_revision(&self) -> Option<&str> {
        self.revision().filter(|revision| !revision.is_empty())
    }

    pub fn integrity(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Entry(entry) => entry.integrity.as_deref(),
        }
    }

    /// Parse one manifest item from JSON
    ///
    /// Null, false and records without a `url` are rejected with
    /// `InvalidManifestEntry`.
    pub fn from_value(value: Value) -> WorkerResult<Self> {
        match value {
            Value::String(url) => Ok(Self::Url(url)),
            Value::Object(_) => serde_json::from_value::<PrecacheEntry>(value.clone())
                .map(Self::Entry)
                .map_err(|_| WorkerError::InvalidManifestEntry(value.to_string())),
            other => Err(WorkerError::InvalidManifestEntry(other.to_string())),
        }
    }
}

impl From<&str> for ManifestEntry {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ManifestEntry {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<PrecacheEntry> for ManifestEntry {
    fn from(entry: PrecacheEntry) -> Self {
        Self::Entry(entry)
    }
}

/// Parse a JSON manifest, an array of URL strings and records
pub fn parse_manifest(manifest: Value) -> WorkerResult<Vec<ManifestEntry>> {
    let Value::Array(items) = manifest else {
        return Err(WorkerError::InvalidManifestEntry(format!(
            "expected an array of entries, got {manifest}"
        )));
    };
    items.into_iter().map(ManifestEntry::from_value).collect()
}

/// The cache key of a manifest entry and the URL it stands for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cache_key: Url,
    pub url: Url,
}

/// Derive an entry's cache key, resolving relative URLs against `base`
pub fn create_cache_key(entry: &ManifestEntry, base: &Url) -> WorkerResult<CacheKey> {
    let raw_url = entry.url();
    if raw_url.is_empty() {
        return Err(WorkerError::InvalidManifestEntry(format!("{entry:?}")));
    }

    let url = base
        .join(raw_url)
        .map_err(|e| WorkerError::invalid_url(raw_url, e))?;

    let Some(revision) = entry.key_revision() else {
        return Ok(CacheKey {
            cache_key: url.clone(),
            url,
        });
    };

    let mut cache_key = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != REVISION_SEARCH_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    cache_key
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(REVISION_SEARCH_PARAM, revision);

    Ok(CacheKey { cache_key, url })
}
