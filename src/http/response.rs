//! HTTP response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::Request;

/// Responses declaring a larger body are not downloaded
pub const MAX_DOWNLOAD_SIZE: u64 = 5 * 1024 * 1024;

/// HTTP response with the metrics matchers and filters work on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,

    /// Response headers
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: Vec<u8>,

    /// Body length in characters
    pub content_length: usize,

    /// Number of space separated words in the body
    pub content_words: usize,

    /// Number of newline separated lines in the body
    pub content_lines: usize,

    /// Content-Type header value
    pub content_type: String,

    /// Time from sending the request to reading the body
    pub duration: Duration,

    /// The body was not read because it exceeded the download cap
    pub cancelled: bool,

    /// The request that produced this response
    pub request: Request,
}

impl Response {
    /// Build a response and derive its body metrics
    pub fn new(
        request: Request,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        duration: Duration,
    ) -> Self {
        let text = String::from_utf8_lossy(&body);
        let content_length = text.chars().count();
        let content_words = text.split(' ').count();
        let content_lines = text.split('\n').count();

        let mut response = Self {
            status,
            headers,
            body,
            content_length,
            content_words,
            content_lines,
            content_type: String::new(),
            duration,
            cancelled: false,
            request,
        };
        response.content_type = response.header("content-type").unwrap_or_default().to_string();
        response
    }

    /// Build a response whose body was skipped; the length comes from `Content-Length`
    pub fn cancelled(
        request: Request,
        status: u16,
        headers: HashMap<String, String>,
        declared_length: u64,
        duration: Duration,
    ) -> Self {
        let mut response = Self::new(request, status, headers, Vec::new(), duration);
        response.content_length = declared_length as usize;
        response.cancelled = true;
        response
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response is redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Get body as string
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Redirect target from the `Location` header, optionally resolved
    /// against the request URL
    pub fn redirect_location(&self, absolute: bool) -> String {
        let location = match self.header("location") {
            Some(location) if self.is_redirect() => location.to_string(),
            _ => return String::new(),
        };

        if !absolute {
            return location;
        }

        match url::Url::parse(&self.request.url).and_then(|base| base.join(&location)) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => location,
        }
    }

    /// The response redirects to the request URL with a trailing slash
    pub fn is_directory_redirect(&self) -> bool {
        let location = self.redirect_location(true);
        !location.is_empty() && location == format!("{}/", self.request.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> Response {
        Response::new(
            Request::new("GET", "http://example.com/admin"),
            status,
            HashMap::new(),
            body.as_bytes().to_vec(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_derived_metrics() {
        let resp = response(200, "hello world\nsecond line here");
        assert_eq!(resp.content_length, 28);
        assert_eq!(resp.content_words, 4);
        assert_eq!(resp.content_lines, 2);
    }

    #[test]
    fn test_metrics_count_characters_not_bytes() {
        let resp = response(200, "héllo");
        assert_eq!(resp.content_length, 5);
        assert_eq!(resp.body.len(), 6);
    }

    #[test]
    fn test_empty_body_metrics() {
        let resp = response(200, "");
        assert_eq!(resp.content_length, 0);
        assert_eq!(resp.content_words, 1);
        assert_eq!(resp.content_lines, 1);
    }

    #[test]
    fn test_cancelled_response_uses_declared_length() {
        let resp = Response::cancelled(
            Request::new("GET", "http://example.com/big"),
            200,
            HashMap::new(),
            MAX_DOWNLOAD_SIZE + 1,
            Duration::ZERO,
        );
        assert!(resp.cancelled);
        assert!(resp.body.is_empty());
        assert_eq!(resp.content_length as u64, MAX_DOWNLOAD_SIZE + 1);
    }

    #[test]
    fn test_directory_redirect() {
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), "/admin/".to_string());
        let resp = Response::new(
            Request::new("GET", "http://example.com/admin"),
            301,
            headers,
            Vec::new(),
            Duration::ZERO,
        );
        assert_eq!(resp.redirect_location(false), "/admin/");
        assert_eq!(resp.redirect_location(true), "http://example.com/admin/");
        assert!(resp.is_directory_redirect());

        let plain = response(200, "ok");
        assert!(!plain.is_directory_redirect());
    }
}
