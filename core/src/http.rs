//! HTTP wire types shared by the builder, the adapter and the transport.
//!
//! # Design
//! These types describe a request after every encoding decision has been
//! made. `EncodedRequest` is what the builder hands to the adapter, and
//! `ResponseHead` is what the transport hands back before the body arrives.
//! Headers are kept as ordered `(name, value)` pairs; lookups are
//! case-insensitive, matching HTTP semantics.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::error::ClientError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether a request body may be sent with this method. Structured data
    /// on a bodiless method is merged into the query string instead.
    pub fn allows_body(self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(ClientError::Validation(format!(
                "unsupported HTTP method: {other}"
            ))),
        }
    }
}

/// URL scheme of the original target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Case-insensitive header lookup over ordered pairs.
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Replace every header called `name` with a single `name: value` pair.
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

/// A finite, single-pass sequence of body chunks pulled on demand.
///
/// The sequence ends at the first `None` or at the first empty chunk,
/// whichever comes first.
pub struct ChunkProducer {
    inner: Box<dyn Iterator<Item = Vec<u8>> + Send>,
}

impl ChunkProducer {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(chunks.into_iter()),
        }
    }

    /// Build a producer from a closure returning `None` (or an empty chunk)
    /// once it is exhausted.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut() -> Option<Vec<u8>> + Send + 'static,
    {
        Self {
            inner: Box::new(std::iter::from_fn(f)),
        }
    }

    /// Pull the next chunk, treating an empty chunk as the end sentinel.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.inner.next().filter(|chunk| !chunk.is_empty())
    }
}

impl fmt::Debug for ChunkProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkProducer(..)")
    }
}

/// Where the bytes of an encoded request come from.
pub enum RequestBody {
    Empty,
    Fixed(Vec<u8>),
    Producer(ChunkProducer),
    Stream(Box<dyn Read + Send>),
}

impl RequestBody {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Empty => "empty",
            RequestBody::Fixed(_) => "fixed",
            RequestBody::Producer(_) => "producer",
            RequestBody::Stream(_) => "stream",
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RequestBody::Empty => Some(&[][..]),
            RequestBody::Fixed(bytes) => Some(bytes),
            RequestBody::Producer(_) | RequestBody::Stream(_) => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Fixed(bytes) => write!(f, "Fixed({} bytes)", bytes.len()),
            RequestBody::Producer(_) => f.write_str("Producer(..)"),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A request with every wire decision resolved.
///
/// `host`/`port` are the connection target. When `proxied` is set they name
/// the proxy and `path` holds the absolute URL of the real target.
#[derive(Debug)]
pub struct EncodedRequest {
    pub method: HttpMethod,
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub proxied: bool,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl EncodedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The URI handed to the transport: absolute when proxied, otherwise
    /// rebuilt from scheme, host, port and path.
    pub fn target_uri(&self) -> String {
        if self.proxied {
            self.path.clone()
        } else {
            format!(
                "{}://{}:{}{}",
                self.scheme.as_str(),
                self.host,
                self.port,
                self.path
            )
        }
    }
}

/// Status line and headers of a response, available before the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!(" Post ".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        let err = "BREW".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn only_get_and_head_are_bodiless() {
        assert!(!HttpMethod::Get.allows_body());
        assert!(!HttpMethod::Head.allows_body());
        assert!(HttpMethod::Post.allows_body());
        assert!(HttpMethod::Delete.allows_body());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        assert_eq!(find_header(&headers, "content-type"), Some("text/plain"));
        assert_eq!(find_header(&headers, "CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(find_header(&headers, "accept"), None);
    }

    #[test]
    fn set_header_replaces_existing_values() {
        let mut headers = vec![
            ("content-type".to_string(), "a".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        set_header(&mut headers, "Content-Type", "b".to_string());
        assert_eq!(headers.len(), 2);
        assert_eq!(find_header(&headers, "content-type"), Some("b"));
    }

    #[test]
    fn producer_stops_at_empty_chunk() {
        let mut producer = ChunkProducer::new(vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
        assert_eq!(producer.next_chunk(), Some(b"a".to_vec()));
        assert_eq!(producer.next_chunk(), None);
    }

    #[test]
    fn producer_from_fn_stops_at_none() {
        let mut left = 2;
        let mut producer = ChunkProducer::from_fn(move || {
            if left == 0 {
                return None;
            }
            left -= 1;
            Some(b"x".to_vec())
        });
        assert!(producer.next_chunk().is_some());
        assert!(producer.next_chunk().is_some());
        assert!(producer.next_chunk().is_none());
    }

    #[test]
    fn target_uri_depends_on_proxy() {
        let mut request = EncodedRequest {
            method: HttpMethod::Get,
            scheme: Scheme::Http,
            host: "example.test".to_string(),
            port: 80,
            path: "/a?b=c".to_string(),
            proxied: false,
            headers: Vec::new(),
            body: RequestBody::Empty,
        };
        assert_eq!(request.target_uri(), "http://example.test:80/a?b=c");

        request.proxied = true;
        request.path = "http://origin.test/a".to_string();
        assert_eq!(request.target_uri(), "http://origin.test/a");
    }
}
