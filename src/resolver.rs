use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// One component entry in the prepare config: either a pinned download URL,
/// or a release listing to scrape plus a way to pick a release from it.
#[derive(Clone, Debug, Deserialize)]
pub struct ComponentSpec {
    /// Pinned download URL; when set, listing resolution is bypassed.
    #[serde(default)]
    pub url: Option<String>,
    /// Release-listing page to scrape.
    #[serde(default)]
    pub index: Option<String>,
    /// Pattern with named capture groups; `url` and `version` are expected,
    /// any extra group becomes a matchable field.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Absent means "latest" (first listed release).
    #[serde(default)]
    pub select: Option<Selector>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    /// Case-insensitive version match.
    Version(String),
    /// Every named field must match, case-insensitively.
    Fields(HashMap<String, String>),
}

/// A release extracted from a listing page; all named capture groups.
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct Release {
    pub fields: HashMap<String, String>,
}

impl Release {
    pub fn version(&self) -> &str {
        self.fields.get("version").map(String::as_str).unwrap_or("")
    }

    pub fn url(&self) -> &str {
        self.fields.get("url").map(String::as_str).unwrap_or("")
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such version of {component}")]
    NoSuchVersion { component: String },

    #[error("failed to fetch release listing '{url}'")]
    Listing {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid release pattern for {component}")]
    Pattern {
        component: String,
        #[source]
        source: regex::Error,
    },

    #[error("component {component} needs either a pinned 'url' or an 'index' and 'pattern'")]
    Underspecified { component: String },
}

/// Cache key for one fetched listing. Explicit and typed; the same
/// index/pattern pair is fetched at most once per process.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ListingKey {
    index: String,
    pattern: String,
}

/// Resolves component specs to concrete releases, memoizing listing fetches
/// for the lifetime of the resolver (one per process run).
pub struct Resolver {
    client: Client,
    cache: Mutex<HashMap<ListingKey, Arc<Vec<Release>>>>,
}

impl Resolver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, component: &str, spec: &ComponentSpec) -> Result<Release, ResolveError> {
        // A pinned URL needs no listing at all
        if let Some(url) = &spec.url {
            let fields = std::iter::once(("url".to_string(), url.clone())).collect();
            return Ok(Release { fields });
        }

        let releases = self.releases(component, spec).await?;
        select(component, &releases, spec.select.as_ref())
    }

    async fn releases(
        &self,
        component: &str,
        spec: &ComponentSpec,
    ) -> Result<Arc<Vec<Release>>, ResolveError> {
        let (index, pattern) = match (&spec.index, &spec.pattern) {
            (Some(index), Some(pattern)) => (index, pattern),
            _ => {
                return Err(ResolveError::Underspecified {
                    component: component.to_string(),
                })
            }
        };

        let key = ListingKey {
            index: index.clone(),
            pattern: pattern.clone(),
        };

        let mut cache = self.cache.lock().await;
        if let Some(found) = cache.get(&key) {
            debug!(component, index = %index, "release listing served from cache");
            return Ok(found.clone());
        }

        let regex = Regex::new(pattern).map_err(|source| ResolveError::Pattern {
            component: component.to_string(),
            source,
        })?;

        let body = self
            .client
            .get(index)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ResolveError::Listing {
                url: index.clone(),
                source,
            })?
            .text()
            .await
            .map_err(|source| ResolveError::Listing {
                url: index.clone(),
                source,
            })?;

        let names: Vec<&str> = regex.capture_names().flatten().collect();
        let releases: Vec<Release> = regex
            .captures_iter(&body)
            .map(|caps| {
                let fields = names
                    .iter()
                    .filter_map(|&name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                    .collect();
                Release { fields }
            })
            .collect();
        debug!(component, count = releases.len(), "release listing fetched");

        let releases = Arc::new(releases);
        cache.insert(key, releases.clone());
        Ok(releases)
    }
}

fn select(
    component: &str,
    releases: &[Release],
    selector: Option<&Selector>,
) -> Result<Release, ResolveError> {
    let found = match selector {
        // Listings are newest-first, so "latest" is the first entry
        None => releases.first(),
        Some(Selector::Version(version)) => releases
            .iter()
            .find(|r| r.version().eq_ignore_ascii_case(version)),
        Some(Selector::Fields(wanted)) => releases.iter().find(|r| {
            wanted
                .iter()
                .all(|(name, value)| r.field(name).eq_ignore_ascii_case(value))
        }),
    };

    found.cloned().ok_or_else(|| ResolveError::NoSuchVersion {
        component: component.to_string(),
    })
}
