//! Request identity used to address cached responses.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a cacheable request: method, absolute URL and the subset of
/// request headers the deployment declared relevant.
///
/// Two requests with equal keys are the same cached resource. Fields are
/// normalized on construction (upper-case method, lower-case header names,
/// headers sorted by name) and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
    vary: Vec<(String, String)>,
}

impl RequestKey {
    pub fn new<I, K, V>(method: &str, url: &str, vary: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut vary: Vec<(String, String)> = vary
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.as_ref().trim().to_string()))
            .collect();
        vary.sort();
        vary.dedup_by(|a, b| a.0 == b.0);

        Self { method: method.to_ascii_uppercase(), url: url.to_string(), vary }
    }

    /// Key for a plain GET of `url` with no varying headers.
    pub fn get(url: &str) -> Self {
        Self::new("GET", url, std::iter::empty::<(&str, &str)>())
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn vary(&self) -> &[(String, String)] {
        &self.vary
    }

    /// Content-addressed hash of the key, used as the row identity.
    pub fn hash(&self) -> String {
        let vary = self
            .vary
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("\n");
        compute_key_hash(&self.method, &self.url, &vary)
    }
}

/// Compute the SHA-256 hex digest identifying a request.
pub fn compute_key_hash(method: &str, url: &str, vary_headers: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(vary_headers.as_bytes());
    hex::encode(hasher.finalize())
}
