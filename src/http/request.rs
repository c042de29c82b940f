//! HTTP request types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single request variant produced from the base template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    pub method: String,

    /// Request URL
    pub url: String,

    /// Host override, sent as the `Host` header when set
    pub host: String,

    /// Request headers
    pub headers: HashMap<String, String>,

    /// Request body
    pub body: Vec<u8>,

    /// Keyword to input value mapping that produced this request
    pub input: HashMap<String, Vec<u8>>,

    /// Combinatorial position (1-based) of the input
    pub position: usize,

    /// Raw template the request was built from, if any
    pub raw: Option<String>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: String::new(),
            host: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            input: HashMap::new(),
            position: 0,
            raw: None,
        }
    }
}

impl Request {
    /// Create a new request
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Body as text
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the keyword occurs in the method, URL, headers or body
    pub fn contains_keyword(&self, keyword: &str) -> bool {
        if keyword.is_empty() {
            return false;
        }
        self.method.contains(keyword)
            || self.url.contains(keyword)
            || self.host.contains(keyword)
            || self
                .headers
                .iter()
                .any(|(k, v)| k.contains(keyword) || v.contains(keyword))
            || find_bytes(&self.body, keyword.as_bytes()).is_some()
    }

    /// Replace every occurrence of `keyword` with `value`
    pub fn substitute(&mut self, keyword: &str, raw: &[u8]) {
        if keyword.is_empty() {
            return;
        }
        let value = String::from_utf8_lossy(raw);

        self.method = self.method.replace(keyword, &value);
        self.url = self.url.replace(keyword, &value);
        self.host = self.host.replace(keyword, &value);
        self.headers = self
            .headers
            .drain()
            .map(|(k, v)| (k.replace(keyword, &value), v.replace(keyword, &value)))
            .collect();

        if let Some(body) = replace_bytes(&self.body, keyword.as_bytes(), raw) {
            self.body = body;
        }
    }

    /// Host and path prefix used to scope per-host calibration and filters:
    /// the URL authority followed by the path with its last segment removed
    pub fn host_fingerprint(&self) -> String {
        let (authority, path) = match url::Url::parse(&self.url) {
            Ok(parsed) => {
                let mut authority = parsed.host_str().unwrap_or_default().to_string();
                if let Some(port) = parsed.port() {
                    authority.push_str(&format!(":{}", port));
                }
                (authority, parsed.path().to_string())
            }
            Err(_) => {
                // Keywords in the authority make the URL unparseable, fall back to text
                let rest = self
                    .url
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(&self.url);
                match rest.find('/') {
                    Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
                    None => (rest.to_string(), String::new()),
                }
            }
        };

        let authority = if self.host.is_empty() {
            authority
        } else {
            self.host.clone()
        };

        let path = path.split('?').next().unwrap_or_default();
        let trimmed = match path.rfind('/') {
            Some(idx) => &path[..idx],
            None => "",
        };
        format!("{}{}", authority, trimmed.trim())
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Byte-level replace; `None` when `needle` does not occur. The body may
/// not be UTF-8 and values are inserted untouched.
fn replace_bytes(haystack: &[u8], needle: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    let mut at = find_bytes(haystack, needle)?;
    let mut out = Vec::with_capacity(haystack.len() + value.len());
    let mut rest = haystack;
    loop {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(value);
        rest = &rest[at + needle.len()..];
        match find_bytes(rest, needle) {
            Some(next) => at = next,
            None => break,
        }
    }
    out.extend_from_slice(rest);
    Some(out)
}

/// Builder for constructing requests
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Set the request method
    pub fn method(mut self, method: &str) -> Self {
        self.request.method = method.to_uppercase();
        self
    }

    /// Set the request URL
    pub fn url(mut self, url: &str) -> Self {
        self.request.url = url.to_string();
        self
    }

    /// Set the Host override
    pub fn host(mut self, host: &str) -> Self {
        self.request.host = host.to_string();
        self
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Add multiple headers
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Set the request body
    pub fn body(mut self, body: &str) -> Self {
        self.request.body = body.as_bytes().to_vec();
        self
    }

    /// Set the raw template
    pub fn raw(mut self, raw: &str) -> Self {
        self.request.raw = Some(raw.to_string());
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}
