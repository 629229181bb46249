//! The seam between the adapter and the networking stack.
//!
//! # Design
//! `Transport` performs one request/response exchange up to the point where
//! response headers are available, then hands back the body as a `Read`.
//! Sockets, TLS, HTTP framing and keep-alive are the transport's business;
//! the default implementation delegates all of it to `ureq`.
//!
//! Producer and stream bodies are exposed to the transport as a `Read`
//! (`BodyReader`) so they go out with chunked transfer encoding, one chunk
//! per pull.
//!
//! Proxies: https targets are tunnelled with CONNECT by a ureq agent built
//! once per proxy address; http targets go through `forward`, which sends the
//! absolute-form request line a forwarding proxy expects.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;
use ureq::http;
use ureq::SendBody;

use crate::adapter::AbortSignal;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::forward;
use crate::http::{ChunkProducer, EncodedRequest, RequestBody, ResponseHead, Scheme};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("exchange aborted")]
    Aborted,
    #[error("{0}")]
    Failed(String),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Aborted => ClientError::Aborted,
            TransportError::Failed(msg) => ClientError::Network(msg),
        }
    }
}

/// Response headers plus a reader over the (not yet received) body.
pub struct TransportResponse {
    pub head: ResponseHead,
    pub body: Box<dyn Read>,
}

pub trait Transport: Send + Sync {
    /// Send `request` and wait for the response head.
    ///
    /// `connected` is called once the exchange holds a live connection,
    /// before this method returns.
    fn send(
        &self,
        request: EncodedRequest,
        signal: &AbortSignal,
        connected: &mut dyn FnMut(),
    ) -> Result<TransportResponse, TransportError>;
}

/// Pull-based `Read` over a producer or stream body that stops with an
/// error as soon as the exchange is aborted.
pub struct BodyReader {
    source: BodySource,
    pending: Vec<u8>,
    offset: usize,
    signal: AbortSignal,
}

enum BodySource {
    Producer(ChunkProducer),
    Stream(Box<dyn Read + Send>),
}

impl BodyReader {
    pub fn producer(producer: ChunkProducer, signal: AbortSignal) -> Self {
        Self::new(BodySource::Producer(producer), signal)
    }

    pub fn stream(reader: Box<dyn Read + Send>, signal: AbortSignal) -> Self {
        Self::new(BodySource::Stream(reader), signal)
    }

    fn new(source: BodySource, signal: AbortSignal) -> Self {
        Self {
            source,
            pending: Vec::new(),
            offset: 0,
            signal,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.signal.is_aborted() {
            return Err(io::Error::other("exchange aborted"));
        }
        match &mut self.source {
            BodySource::Stream(reader) => reader.read(buf),
            BodySource::Producer(producer) => {
                if self.offset == self.pending.len() {
                    match producer.next_chunk() {
                        Some(chunk) => {
                            self.pending = chunk;
                            self.offset = 0;
                        }
                        None => return Ok(0),
                    }
                }
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                Ok(n)
            }
        }
    }
}

/// `Transport` backed by a `ureq::Agent`.
pub struct UreqTransport {
    config: ClientConfig,
    agent: ureq::Agent,
    /// Tunnelling agents keyed by `host:port` of the proxy.
    proxy_agents: Mutex<HashMap<String, ureq::Agent>>,
}

impl UreqTransport {
    pub fn new(config: ClientConfig) -> Self {
        let agent = config.build_agent(None);
        Self::with_agent(config, agent)
    }

    /// Use a caller-supplied agent so connections are shared with other code.
    ///
    /// The agent serves direct requests. Requests through a proxy use the
    /// agent registered with `with_proxy_agent`, or one built from `config`.
    pub fn with_agent(config: ClientConfig, agent: ureq::Agent) -> Self {
        Self {
            config,
            agent,
            proxy_agents: Mutex::new(HashMap::new()),
        }
    }

    /// Register the agent that tunnels https requests through `host:port`.
    /// It must already be configured with that proxy.
    pub fn with_proxy_agent(self, host: &str, port: u16, agent: ureq::Agent) -> Self {
        self.proxy_agents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(proxy_key(host, port), agent);
        self
    }

    fn agent_for(&self, request: &EncodedRequest) -> Result<ureq::Agent, TransportError> {
        if !request.proxied {
            return Ok(self.agent.clone());
        }
        let key = proxy_key(&request.host, request.port);
        let mut agents = self.proxy_agents.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(agent) = agents.get(&key) {
            return Ok(agent.clone());
        }
        let proxy = ureq::Proxy::new(&format!("http://{key}"))
            .map_err(|e| TransportError::Failed(format!("invalid proxy: {e}")))?;
        let agent = self.config.build_agent(Some(proxy));
        debug!(proxy = %key, "built tunnelling agent");
        agents.insert(key, agent.clone());
        Ok(agent)
    }

    #[cfg(test)]
    fn cached_proxy_agents(&self) -> usize {
        self.proxy_agents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn proxy_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// ureq frames the body itself: it derives Content-Length from fixed bodies
/// and chunks readers of unknown size.
fn framed_by_transport(name: &str, body: &RequestBody) -> bool {
    if name.eq_ignore_ascii_case("transfer-encoding") {
        return true;
    }
    name.eq_ignore_ascii_case("content-length")
        && matches!(body, RequestBody::Empty | RequestBody::Fixed(_))
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: EncodedRequest,
        signal: &AbortSignal,
        connected: &mut dyn FnMut(),
    ) -> Result<TransportResponse, TransportError> {
        if request.proxied && request.scheme == Scheme::Http {
            return forward::send(
                request,
                &self.config.user_agent,
                self.config.timeout(),
                signal,
                connected,
            );
        }
        let agent = self.agent_for(&request)?;
        let uri = request.target_uri();

        let mut builder = http::Request::builder()
            .method(request.method.as_str())
            .uri(uri.as_str());
        for (name, value) in &request.headers {
            if !framed_by_transport(name, &request.body) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let invalid = |e: http::Error| TransportError::Failed(format!("invalid request: {e}"));
        let result = match request.body {
            RequestBody::Empty => agent.run(builder.body(()).map_err(invalid)?),
            RequestBody::Fixed(bytes) => agent.run(builder.body(bytes).map_err(invalid)?),
            RequestBody::Producer(producer) => {
                let mut reader = BodyReader::producer(producer, signal.clone());
                agent.run(builder.body(SendBody::from_reader(&mut reader)).map_err(invalid)?)
            }
            RequestBody::Stream(stream) => {
                let mut reader = BodyReader::stream(stream, signal.clone());
                agent.run(builder.body(SendBody::from_reader(&mut reader)).map_err(invalid)?)
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(_) if signal.is_aborted() => return Err(TransportError::Aborted),
            Err(e) => return Err(TransportError::Failed(e.to_string())),
        };
        connected();

        let head = ResponseHead {
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect(),
        };
        debug!(%uri, status = head.status, "response head received");

        Ok(TransportResponse {
            head,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}
