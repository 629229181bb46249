//! Small convenience HTTP client over `ureq`.
//!
//! # Overview
//! Describe a request (URL, method, headers, form fields, files, raw or
//! streamed body, proxy), send it, and receive the response body decoded as
//! JSON when the server says it is JSON, or as raw bytes otherwise.
//!
//! # Design
//! - `builder` turns a `Request` into an `EncodedRequest` with no I/O:
//!   content type, multipart or form-url encoding, framing headers and proxy
//!   rewriting are all decided here.
//! - `adapter` drives exactly one exchange through the `Transport` seam,
//!   accumulates the body, decodes it and reports lifecycle hooks.
//! - `transport` holds the seam and its `ureq` implementation. Sockets, TLS
//!   and HTTP framing belong to ureq, except for plain-HTTP requests through
//!   a forwarding proxy, which `forward` writes itself.
//! - `Client` ties them together: `open` runs in the background and reports
//!   through a callback, `send` blocks.

pub mod adapter;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod form;
mod forward;
pub mod http;
pub mod multipart;
pub mod response;
pub mod transport;
pub mod types;

pub use adapter::{AbortSignal, Exchange, ExchangeHooks, Phase, RequestHandle};
pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{ChunkProducer, EncodedRequest, HttpMethod, RequestBody, ResponseHead, Scheme};
pub use response::{ParsedResult, Response, ResponseAccumulator};
pub use transport::{Transport, TransportError, TransportResponse, UreqTransport};
pub use types::{BodyData, FileUpload, Proxy, Request, RequestDescriptor};
