//! Round-robin upstream endpoint registry.

use parking_lot::Mutex;
use thiserror::Error;
use url::Url;

/// An upstream list could not be turned into a registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no urls provided")]
    NoUrls,

    #[error("invalid url scheme provided")]
    NoScheme,

    #[error("invalid url host provided")]
    NoHost,

    #[error("invalid upstream url '{url}': {reason}")]
    Parse { url: String, reason: String },
}

/// One upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse an absolute `http` or `https` base URL.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let url = Url::parse(raw.trim()).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => RegistryError::NoScheme,
            url::ParseError::EmptyHost => RegistryError::NoHost,
            other => RegistryError::Parse {
                url: raw.to_string(),
                reason: other.to_string(),
            },
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::NoScheme);
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RegistryError::NoHost);
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The upstream URL for an inbound `path?query`.
    ///
    /// The request path is appended to the base path with a single slash between them,
    /// and the base query (if any) comes before the request query.
    pub fn join(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        let path = path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", base, path));

        let merged = match (url.query().filter(|q| !q.is_empty()), query) {
            (Some(base), Some(extra)) if !extra.is_empty() => Some(format!("{}&{}", base, extra)),
            (Some(base), _) => Some(base.to_string()),
            (None, Some(extra)) if !extra.is_empty() => Some(extra.to_string()),
            (None, _) => None,
        };
        url.set_query(merged.as_deref());
        url
    }
}

/// Ordered, non-empty set of endpoints with a shared cursor.
#[derive(Debug)]
pub struct Registry {
    endpoints: Vec<Endpoint>,
    cursor: Mutex<usize>,
}

impl Registry {
    /// Build a registry from base URLs. Every URL must parse.
    pub fn new<S: AsRef<str>>(urls: &[S]) -> Result<Self, RegistryError> {
        if urls.is_empty() {
            return Err(RegistryError::NoUrls);
        }
        let endpoints = urls
            .iter()
            .map(|u| Endpoint::parse(u.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            endpoints,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The endpoint at the cursor. Advances the cursor by one.
    pub fn endpoint(&self) -> &Endpoint {
        let mut cursor = self.cursor.lock();
        let endpoint = &self.endpoints[*cursor];
        *cursor = (*cursor + 1) % self.endpoints.len();
        endpoint
    }

    /// Every endpoint once, starting at the cursor. Advances the cursor by one.
    ///
    /// The first candidate is what [`Registry::endpoint`] would have returned, so the
    /// selection and the failover order come from a single cursor step.
    pub fn candidates(&self) -> Vec<&Endpoint> {
        let start = {
            let mut cursor = self.cursor.lock();
            let start = *cursor;
            *cursor = (start + 1) % self.endpoints.len();
            start
        };
        let len = self.endpoints.len();
        (0..len).map(|i| &self.endpoints[(start + i) % len]).collect()
    }
}
