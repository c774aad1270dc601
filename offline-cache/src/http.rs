//! Request and response types exchanged with the host and the network.
//!
//! Header names are stored lower-cased so lookups are case-insensitive.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Default for RequestMethod {
    fn default() -> Self {
        Self::Get
    }
}

impl RequestMethod {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Only `GET` responses are ever written to the cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    /// Same-origin only
    SameOrigin,
    /// No CORS
    NoCors,
    /// CORS
    Cors,
    /// Top-level navigation
    Navigate,
}

impl Default for RequestMode {
    fn default() -> Self {
        Self::Cors
    }
}

/// Inbound request handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request URL (absolute, or relative to the configured origin)
    pub url: String,
    /// HTTP method
    pub method: RequestMethod,
    /// Request headers, lower-cased names
    pub headers: BTreeMap<String, String>,
    /// Request body (if any)
    pub body: Option<Vec<u8>>,
    /// Request mode; `Navigate` marks a navigation request
    pub mode: RequestMode,
}

impl Request {
    /// Create a new sub-resource `GET` request
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RequestMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            mode: RequestMode::Cors,
        }
    }

    /// Create a navigation request
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::new(url)
        }
    }

    /// Set method
    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    /// Set header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Check if this is a top-level navigation
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether the request carries `Authorization` or `Cookie`.
    pub fn has_credentials(&self) -> bool {
        self.header("authorization").is_some() || self.header("cookie").is_some()
    }
}

/// Response returned by the network or replayed from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// URL the response was produced for
    pub url: String,
    /// Status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Response headers, lower-cased names
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response
    pub fn new(status: u16) -> Self {
        Self {
            url: String::new(),
            status,
            status_text: status_text_for(status).to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Check if response is OK (2xx)
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `Content-Type` header, or `application/octet-stream` when absent
    pub fn content_type(&self) -> &str {
        self.header("content-type")
            .unwrap_or("application/octet-stream")
    }
}

/// Get status text for status code
pub(crate) fn status_text_for(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let req = Request::new("https://example.com/page");
        assert_eq!(req.url, "https://example.com/page");
        assert_eq!(req.method, RequestMethod::Get);
        assert!(req.body.is_none());
        assert!(!req.is_navigation());
    }

    #[test]
    fn test_navigation_request() {
        let req = Request::navigate("/expenses/");
        assert!(req.is_navigation());
        assert_eq!(req.method, RequestMethod::Get);
    }

    #[test]
    fn test_request_method_round_trip_str() {
        for method in [
            RequestMethod::Get,
            RequestMethod::Head,
            RequestMethod::Post,
            RequestMethod::Delete,
        ] {
            assert_eq!(method.as_str().parse::<RequestMethod>().unwrap(), method);
        }
        assert_eq!("get".parse::<RequestMethod>().unwrap(), RequestMethod::Get);
        assert!("BREW".parse::<RequestMethod>().is_err());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = Request::new("/").with_header("Authorization", "Bearer x");
        assert_eq!(req.header("authorization"), Some("Bearer x"));
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer x"));

        let resp = Response::new(200).with_header("Content-Type", "text/css");
        assert_eq!(resp.content_type(), "text/css");
    }

    #[test]
    fn test_response_ok_range() {
        assert!(Response::new(200).ok());
        assert!(Response::new(204).ok());
        assert!(Response::new(299).ok());
        assert!(!Response::new(304).ok());
        assert!(!Response::new(404).ok());
        assert!(!Response::new(500).ok());
    }

    #[test]
    fn test_response_status_text() {
        assert_eq!(Response::new(200).status_text, "OK");
        assert_eq!(Response::new(503).status_text, "Service Unavailable");
        assert_eq!(Response::new(299).status_text, "Unknown");
    }

    #[test]
    fn test_default_content_type() {
        assert_eq!(Response::new(200).content_type(), "application/octet-stream");
    }
}
