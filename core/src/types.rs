//! Logical request description supplied by callers.
//!
//! # Design
//! A single tagged `Request` replaces positional overloads: either a bare URL
//! (GET convenience form) or a full `RequestDescriptor`. The descriptor is
//! consumed by the builder exactly once.

use std::fmt;
use std::io::Read;

use crate::http::{ChunkProducer, HttpMethod};

/// What the caller wants sent.
#[derive(Debug)]
pub enum Request {
    /// Plain GET of the given URL.
    Get(String),
    /// Everything else.
    Options(RequestDescriptor),
}

impl From<&str> for Request {
    fn from(url: &str) -> Self {
        Request::Get(url.to_string())
    }
}

impl From<String> for Request {
    fn from(url: String) -> Self {
        Request::Get(url)
    }
}

impl From<RequestDescriptor> for Request {
    fn from(descriptor: RequestDescriptor) -> Self {
        Request::Options(descriptor)
    }
}

/// Request payload as supplied by the caller.
pub enum BodyData {
    /// Ordered field mapping. Form-url-encoded, placed in the query string
    /// for bodiless methods, or sent as multipart parts alongside files.
    Fields(Vec<(String, String)>),
    /// Bytes sent unchanged.
    Raw(Vec<u8>),
    /// Chunks pulled one at a time and sent with chunked transfer encoding.
    Producer(ChunkProducer),
    /// A reader drained to EOF and sent with chunked transfer encoding.
    Stream(Box<dyn Read + Send>),
}

impl BodyData {
    pub(crate) fn is_present(&self) -> bool {
        match self {
            BodyData::Fields(fields) => !fields.is_empty(),
            _ => true,
        }
    }
}

impl fmt::Debug for BodyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyData::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            BodyData::Raw(bytes) => write!(f, "Raw({} bytes)", bytes.len()),
            BodyData::Producer(_) => f.write_str("Producer(..)"),
            BodyData::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A file attached as one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Form field name; falls back to `file_name` when unset.
    pub field_name: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: &str, mime_type: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            field_name: None,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            content: content.into(),
        }
    }

    pub fn field(mut self, name: &str) -> Self {
        self.field_name = Some(name.to_string());
        self
    }

    pub fn effective_field_name(&self) -> &str {
        self.field_name.as_deref().unwrap_or(&self.file_name)
    }
}

/// Forward proxy the request is routed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

/// Full request description.
///
/// `method` defaults to POST when a body or files are present and to GET
/// otherwise.
#[derive(Debug, Default)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Option<HttpMethod>,
    pub headers: Vec<(String, String)>,
    pub data: Option<BodyData>,
    pub files: Vec<FileUpload>,
    pub proxy: Option<Proxy>,
}

impl RequestDescriptor {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.data = Some(BodyData::Fields(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    pub fn raw(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.data = Some(BodyData::Raw(body.into()));
        self
    }

    pub fn producer(mut self, producer: ChunkProducer) -> Self {
        self.data = Some(BodyData::Producer(producer));
        self
    }

    pub fn stream(mut self, reader: impl Read + Send + 'static) -> Self {
        self.data = Some(BodyData::Stream(Box::new(reader)));
        self
    }

    pub fn file(mut self, file: FileUpload) -> Self {
        self.files.push(file);
        self
    }

    pub fn proxy(mut self, host: &str, port: u16) -> Self {
        self.proxy = Some(Proxy {
            host: host.to_string(),
            port,
        });
        self
    }
}
