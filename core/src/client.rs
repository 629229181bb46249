//! HTTP client entry points.
//!
//! # Design
//! `Client` holds only its configuration and a shared `Transport`; it keeps
//! no per-request state. Each call encodes the request up front (so URL and
//! validation errors come back before any I/O), then hands the encoded
//! request to a fresh `Exchange`. `open` runs the exchange on its own thread
//! and reports through a callback; `send` runs it on the caller's thread.

use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::adapter::{Exchange, ExchangeHooks, RequestHandle};
use crate::builder;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{find_header, EncodedRequest};
use crate::response::Response;
use crate::transport::{Transport, UreqTransport};
use crate::types::Request;

#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client backed by a ureq agent built from `config`.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(UreqTransport::new(config.clone()));
        Self { config, transport }
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Encode `request` and add configured default headers it does not set.
    pub fn build(&self, request: impl Into<Request>) -> Result<EncodedRequest, ClientError> {
        let mut encoded = builder::encode(request.into())?;
        for (name, value) in &self.config.default_headers {
            if find_header(&encoded.headers, name).is_none() {
                encoded.headers.push((name.clone(), value.clone()));
            }
        }
        Ok(encoded)
    }

    /// Start an exchange in the background.
    ///
    /// `callback` fires exactly once with the outcome, unless the exchange is
    /// closed through the returned handle first, in which case it never fires.
    pub fn open<F>(
        &self,
        request: impl Into<Request>,
        hooks: Arc<dyn ExchangeHooks>,
        callback: F,
    ) -> Result<RequestHandle, ClientError>
    where
        F: FnOnce(Result<Response, ClientError>) + Send + 'static,
    {
        let encoded = self.build(request)?;
        let exchange = Exchange::new(encoded, self.transport.clone(), hooks.clone());
        let signal = exchange.signal();

        let worker = thread::Builder::new()
            .name("httpc-exchange".to_string())
            .spawn(move || match exchange.run() {
                Err(ClientError::Aborted) => debug!("dropping result of aborted exchange"),
                outcome => callback(outcome),
            })
            .map_err(|e| ClientError::Network(format!("failed to start exchange: {e}")))?;

        Ok(RequestHandle::new(signal, hooks, worker))
    }

    /// GET `url` in the background with no lifecycle hooks.
    pub fn get<F>(&self, url: &str, callback: F) -> Result<RequestHandle, ClientError>
    where
        F: FnOnce(Result<Response, ClientError>) + Send + 'static,
    {
        self.open(url, Arc::new(()), callback)
    }

    /// Run an exchange to completion on the calling thread.
    pub fn send(&self, request: impl Into<Request>) -> Result<Response, ClientError> {
        let encoded = self.build(request)?;
        Exchange::new(encoded, self.transport.clone(), Arc::new(())).run()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
