use serde::{Deserialize, Serialize};
use url::Url;

/// Identity of a cached request: upper-cased method plus absolute URL
/// with the fragment removed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Shorthand for a GET identity
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response as held by the cache or returned from the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>, // (name, value) pairs, original order
    pub body: Vec<u8>,
}

impl StoredResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// True for 2xx statuses
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Lower-cased header names listed in `Vary`
    pub fn vary_names(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("vary"))
            .flat_map(|(_, v)| v.split(','))
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// One persisted cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: RequestKey,
    /// Request header values selected by the response's `Vary` header,
    /// names lower-cased; `None` when the request did not carry the header
    pub vary: Vec<(String, Option<String>)>,
    pub response: StoredResponse,
    /// Hex SHA-256 of `response.body`, filled in by the store
    pub body_sha256: String,
    /// Unix timestamp in milliseconds
    pub stored_at: i64,
}

impl CacheRecord {
    /// Build a record for a request, capturing the header values its response varies on
    pub fn new(key: RequestKey, request_headers: &[(String, String)], response: StoredResponse) -> Self {
        let vary = response
            .vary_names()
            .into_iter()
            .filter(|name| name != "*")
            .map(|name| {
                let value = lookup_header(request_headers, &name).map(str::to_string);
                (name, value)
            })
            .collect();
        Self {
            key,
            vary,
            response,
            body_sha256: String::new(),
            stored_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Check whether this record answers a request carrying `request_headers`
    ///
    /// A response with `Vary: *` never matches.
    pub fn vary_matches(&self, request_headers: &[(String, String)]) -> bool {
        if self.response.vary_names().iter().any(|n| n == "*") {
            return false;
        }
        self.vary
            .iter()
            .all(|(name, stored)| lookup_header(request_headers, name) == stored.as_deref())
    }
}

fn lookup_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
