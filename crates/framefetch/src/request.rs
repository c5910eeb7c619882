//! Request and response descriptors.
//!
//! The core treats these as opaque payload apart from [`TransferRequest::validate`],
//! which rejects descriptors no engine could run.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Custom(name) => name,
        }
    }

    /// Parse a method name, mapping well-known names to their variants.
    pub fn parse(name: &str) -> Self {
        match name {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an engine needs to run one request/response exchange.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Whole-transfer timeout. `None` leaves it to the engine default.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
}

impl TransferRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            body: None,
            timeout: None,
            connect_timeout: None,
            follow_redirects: true,
            max_redirects: 10,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Check the descriptor is well formed. Returns the reason on rejection.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("empty url".into());
        }
        let url = Url::parse(&self.url).map_err(|e| format!("bad url {:?}: {}", self.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported scheme {:?}", url.scheme()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err("url has no host".into());
        }

        let method = self.method.as_str();
        if method.is_empty() || !method.bytes().all(is_token_byte) {
            return Err(format!("bad method {:?}", method));
        }
        if self.method == Method::Head && self.body.is_some() {
            return Err("HEAD request cannot carry a body".into());
        }

        for (name, value) in &self.headers {
            if name.is_empty() || !name.bytes().all(is_token_byte) {
                return Err(format!("bad header name {:?}", name));
            }
            if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
                return Err(format!("header {:?} has a line break in its value", name));
            }
        }

        Ok(())
    }
}

/// RFC 9110 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Result of a transfer that reached the server and got an answer back.
/// Non-2xx status codes are still successes at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub status: u16,
    /// Headers of the final response in a redirect chain.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub effective_url: Option<String>,
    pub elapsed: Duration,
}

impl TransferResponse {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_get() {
        assert!(TransferRequest::get("http://example.com/status").validate().is_ok());
        assert!(
            TransferRequest::post("https://example.com:8443/submit")
                .header("Content-Type", "application/json")
                .body("{}")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_rejects_malformed_urls() {
        assert!(TransferRequest::get("").validate().is_err());
        assert!(TransferRequest::get("   ").validate().is_err());
        assert!(TransferRequest::get("not a url").validate().is_err());
        assert!(TransferRequest::get("ftp://example.com/file").validate().is_err());
        assert!(TransferRequest::get("file:///etc/passwd").validate().is_err());
    }

    #[test]
    fn test_rejects_bad_methods_and_headers() {
        let bad_method = TransferRequest::new(Method::Custom("GE T".into()), "http://example.com");
        assert!(bad_method.validate().is_err());

        let empty_method = TransferRequest::new(Method::Custom(String::new()), "http://example.com");
        assert!(empty_method.validate().is_err());

        let bad_name = TransferRequest::get("http://example.com").header("X Bad", "1");
        assert!(bad_name.validate().is_err());

        let split = TransferRequest::get("http://example.com").header("X-Ok", "a\r\nInjected: 1");
        assert!(split.validate().is_err());

        let head_body = TransferRequest::head("http://example.com").body("x");
        assert!(head_body.validate().is_err());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET"), Method::Get);
        assert_eq!(Method::parse("PROPFIND"), Method::Custom("PROPFIND".into()));
        assert_eq!(Method::parse("PROPFIND").as_str(), "PROPFIND");
    }

    #[test]
    fn test_response_header_lookup() {
        let response = TransferResponse {
            status: 204,
            headers: vec![("Content-Length".into(), "0".into())],
            body: Bytes::new(),
            effective_url: None,
            elapsed: Duration::ZERO,
        };
        assert_eq!(response.header("content-length"), Some("0"));
        assert_eq!(response.header("etag"), None);
        assert!(response.is_success());
    }
}
