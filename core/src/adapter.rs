//! Drives one request/response exchange from send to decoded result.
//!
//! # Design
//! The lifecycle is linear: `Idle → Sending → AwaitingResponse → Receiving →
//! Completed`, with `Aborted` and `Failed` as the other terminal phases.
//! The phase lives behind a mutex shared by the worker and the caller's
//! `RequestHandle`; every transition goes through it, so exactly one of
//! "callback fires" and "abort hook fires" can ever happen.
//!
//! Hooks are notification points only. Each fires at most once per
//! exchange, except `on_chunk`.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::http::{EncodedRequest, ResponseHead};
use crate::response::{self, Response, ResponseAccumulator};
use crate::transport::Transport;

const READ_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    AwaitingResponse,
    Receiving,
    Completed,
    Aborted,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted | Phase::Failed)
    }
}

/// Shared view of an exchange's phase, used to request and observe abort.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    phase: Arc<Mutex<Phase>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_aborted(&self) -> bool {
        self.phase() == Phase::Aborted
    }

    /// Move to `Aborted` unless the exchange already finished. Returns
    /// whether this call performed the transition.
    pub fn abort(&self) -> bool {
        self.advance(Phase::Aborted)
    }

    fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if phase.is_terminal() {
            return false;
        }
        debug!(from = ?*phase, to = ?next, "exchange phase");
        *phase = next;
        true
    }
}

/// Lifecycle notifications for a single exchange. All methods default to
/// doing nothing.
pub trait ExchangeHooks: Send + Sync {
    fn on_connected(&self) {}
    fn on_response(&self, _head: &ResponseHead) {}
    fn on_chunk(&self, _chunk: &[u8]) {}
    fn on_complete(&self) {}
    fn on_error(&self, _error: &ClientError) {}
    fn on_abort(&self) {}
}

impl ExchangeHooks for () {}

/// One request/response exchange. Consumed by `run`.
pub struct Exchange {
    request: EncodedRequest,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn ExchangeHooks>,
    signal: AbortSignal,
}

impl Exchange {
    pub fn new(
        request: EncodedRequest,
        transport: Arc<dyn Transport>,
        hooks: Arc<dyn ExchangeHooks>,
    ) -> Self {
        Self {
            request,
            transport,
            hooks,
            signal: AbortSignal::new(),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Drive the exchange to a terminal phase.
    ///
    /// Returns `Err(ClientError::Aborted)` whenever the exchange was aborted,
    /// regardless of how far it got; callers must not report that outcome.
    pub fn run(self) -> Result<Response, ClientError> {
        let Exchange {
            request,
            transport,
            hooks,
            signal,
        } = self;

        if !signal.advance(Phase::Sending) {
            return Err(ClientError::Aborted);
        }

        let mut connected = || {
            if signal.advance(Phase::AwaitingResponse) {
                hooks.on_connected();
            }
        };
        let sent = transport.send(request, &signal, &mut connected);
        let response = match sent {
            Ok(response) => response,
            Err(e) => return fail(&signal, hooks.as_ref(), e.into()),
        };

        if !signal.advance(Phase::Receiving) {
            return Err(ClientError::Aborted);
        }
        hooks.on_response(&response.head);

        let body = match receive(response.body, &signal, hooks.as_ref()) {
            Ok(body) => body,
            Err(e) => return fail(&signal, hooks.as_ref(), e),
        };

        let bytes = body.len();
        let parsed = match response::decode(response.head.content_type(), body) {
            Ok(parsed) => parsed,
            Err(e) => return fail(&signal, hooks.as_ref(), e),
        };

        if !signal.advance(Phase::Completed) {
            return Err(ClientError::Aborted);
        }
        debug!(status = response.head.status, bytes, "exchange completed");
        hooks.on_complete();

        Ok(Response {
            head: response.head,
            body: parsed,
        })
    }
}

fn receive(
    mut body: Box<dyn Read>,
    signal: &AbortSignal,
    hooks: &dyn ExchangeHooks,
) -> Result<Vec<u8>, ClientError> {
    let mut accumulator = ResponseAccumulator::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if signal.is_aborted() {
            return Err(ClientError::Aborted);
        }
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::Network(e.to_string())),
        };
        if signal.is_aborted() {
            return Err(ClientError::Aborted);
        }
        hooks.on_chunk(&buf[..n]);
        accumulator.push(&buf[..n]);
    }
    Ok(accumulator.finish())
}

fn fail(
    signal: &AbortSignal,
    hooks: &dyn ExchangeHooks,
    error: ClientError,
) -> Result<Response, ClientError> {
    if error == ClientError::Aborted || !signal.advance(Phase::Failed) {
        return Err(ClientError::Aborted);
    }
    warn!(%error, "exchange failed");
    hooks.on_error(&error);
    Err(error)
}

/// Caller's handle on an exchange running in the background.
pub struct RequestHandle {
    signal: AbortSignal,
    hooks: Arc<dyn ExchangeHooks>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}

impl RequestHandle {
    pub(crate) fn new(
        signal: AbortSignal,
        hooks: Arc<dyn ExchangeHooks>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            signal,
            hooks,
            worker: Some(worker),
        }
    }

    pub fn phase(&self) -> Phase {
        self.signal.phase()
    }

    /// Cancel the exchange. The completion callback will not fire and
    /// `on_abort` fires once. Returns `false` if the exchange had already
    /// reached a terminal phase.
    pub fn close(&self) -> bool {
        if !self.signal.abort() {
            return false;
        }
        info!("exchange aborted by caller");
        self.hooks.on_abort();
        true
    }

    /// Wait for the worker to finish and return the terminal phase.
    pub fn wait(mut self) -> Phase {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("completion callback panicked");
            }
        }
        self.signal.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::mpsc;

    use serde_json::json;

    use crate::http::{HttpMethod, RequestBody, Scheme};
    use crate::response::ParsedResult;
    use crate::transport::{TransportError, TransportResponse};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }
    }

    impl ExchangeHooks for Recorder {
        fn on_connected(&self) {
            self.record("connected");
        }
        fn on_response(&self, head: &ResponseHead) {
            self.record(format!("response {}", head.status));
        }
        fn on_chunk(&self, chunk: &[u8]) {
            self.record(format!("chunk {}", String::from_utf8_lossy(chunk)));
        }
        fn on_complete(&self) {
            self.record("complete");
        }
        fn on_error(&self, _error: &ClientError) {
            self.record("error");
        }
        fn on_abort(&self) {
            self.record("abort");
        }
    }

    /// Reads one scripted chunk per call so chunk boundaries are observable.
    struct ScriptedBody(Vec<Vec<u8>>);

    impl Read for ScriptedBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    struct ScriptedTransport {
        content_type: &'static str,
        chunks: Vec<&'static str>,
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            _request: EncodedRequest,
            _signal: &AbortSignal,
            connected: &mut dyn FnMut(),
        ) -> Result<TransportResponse, TransportError> {
            connected();
            Ok(TransportResponse {
                head: ResponseHead {
                    status: 200,
                    headers: vec![("Content-Type".to_string(), self.content_type.to_string())],
                },
                body: Box::new(ScriptedBody(
                    self.chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                )),
            })
        }
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn send(
            &self,
            _request: EncodedRequest,
            _signal: &AbortSignal,
            _connected: &mut dyn FnMut(),
        ) -> Result<TransportResponse, TransportError> {
            Err(TransportError::Failed("connection refused".to_string()))
        }
    }

    fn request() -> EncodedRequest {
        EncodedRequest {
            method: HttpMethod::Get,
            scheme: Scheme::Http,
            host: "example.test".to_string(),
            port: 80,
            path: "/".to_string(),
            proxied: false,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[test]
    fn hooks_fire_in_lifecycle_order() {
        let recorder = Arc::new(Recorder::default());
        let transport = Arc::new(ScriptedTransport {
            content_type: "text/plain",
            chunks: vec!["hel", "lo"],
        });
        let exchange = Exchange::new(request(), transport, recorder.clone());
        let signal = exchange.signal();

        let response = exchange.run().unwrap();
        assert_eq!(response.body.text().as_deref(), Some("hello"));
        assert_eq!(signal.phase(), Phase::Completed);
        assert_eq!(
            recorder.events(),
            vec!["connected", "response 200", "chunk hel", "chunk lo", "complete"]
        );
    }

    #[test]
    fn json_body_is_decoded_from_chunks() {
        let transport = Arc::new(ScriptedTransport {
            content_type: "application/json; charset=utf-8",
            chunks: vec![r#"{"ok":"#, r#"true}"#],
        });
        let response = Exchange::new(request(), transport, Arc::new(())).run().unwrap();
        assert_eq!(response.body, ParsedResult::Json(json!({"ok": true})));
    }

    #[test]
    fn decode_failure_is_reported_once() {
        let recorder = Arc::new(Recorder::default());
        let transport = Arc::new(ScriptedTransport {
            content_type: "application/json",
            chunks: vec!["<html>"],
        });
        let exchange = Exchange::new(request(), transport, recorder.clone());
        let signal = exchange.signal();

        let err = exchange.run().unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert_eq!(signal.phase(), Phase::Failed);
        assert_eq!(recorder.events().last().map(String::as_str), Some("error"));
        assert!(!recorder.events().contains(&"complete".to_string()));
    }

    #[test]
    fn network_failure_is_a_network_error() {
        let recorder = Arc::new(Recorder::default());
        let exchange = Exchange::new(request(), Arc::new(RefusingTransport), recorder.clone());
        let err = exchange.run().unwrap_err();
        assert_eq!(err, ClientError::Network("connection refused".to_string()));
        assert_eq!(recorder.events(), vec!["error"]);
    }

    #[test]
    fn abort_before_start_skips_the_transport() {
        let exchange = Exchange::new(request(), Arc::new(RefusingTransport), Arc::new(()));
        assert!(exchange.signal().abort());
        assert_eq!(exchange.run().unwrap_err(), ClientError::Aborted);
    }

    #[test]
    fn terminal_phases_cannot_be_left() {
        let signal = AbortSignal::new();
        assert!(signal.advance(Phase::Sending));
        assert!(signal.advance(Phase::Completed));
        assert!(!signal.abort());
        assert_eq!(signal.phase(), Phase::Completed);
    }

    /// Body whose chunks are fed by the test through a channel.
    struct ChannelBody(mpsc::Receiver<Vec<u8>>);

    impl Read for ChannelBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    struct ChannelTransport(Mutex<Option<mpsc::Receiver<Vec<u8>>>>);

    impl Transport for ChannelTransport {
        fn send(
            &self,
            _request: EncodedRequest,
            _signal: &AbortSignal,
            connected: &mut dyn FnMut(),
        ) -> Result<TransportResponse, TransportError> {
            connected();
            let rx = self.0.lock().unwrap().take().expect("single use");
            Ok(TransportResponse {
                head: ResponseHead {
                    status: 200,
                    headers: Vec::new(),
                },
                body: Box::new(ChannelBody(rx)),
            })
        }
    }

    struct ResponseSignal {
        recorder: Recorder,
        tx: Mutex<mpsc::Sender<()>>,
    }

    impl ExchangeHooks for ResponseSignal {
        fn on_response(&self, head: &ResponseHead) {
            self.recorder.on_response(head);
            let _ = self.tx.lock().unwrap().send(());
        }
        fn on_chunk(&self, chunk: &[u8]) {
            self.recorder.on_chunk(chunk);
        }
        fn on_complete(&self) {
            self.recorder.on_complete();
        }
        fn on_abort(&self) {
            self.recorder.on_abort();
        }
    }

    #[test]
    fn abort_while_receiving_suppresses_the_result() {
        let (chunk_tx, chunk_rx) = mpsc::channel();
        let (head_tx, head_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let hooks = Arc::new(ResponseSignal {
            recorder: Recorder::default(),
            tx: Mutex::new(head_tx),
        });

        let exchange = Exchange::new(
            request(),
            Arc::new(ChannelTransport(Mutex::new(Some(chunk_rx)))),
            hooks.clone(),
        );
        let signal = exchange.signal();
        let worker = std::thread::spawn(move || {
            let outcome = exchange.run();
            if !matches!(outcome, Err(ClientError::Aborted)) {
                done_tx.send(outcome).unwrap();
            }
        });
        let handle = RequestHandle::new(signal, hooks.clone(), worker);

        head_rx.recv().unwrap();
        chunk_tx.send(b"partial".to_vec()).unwrap();
        assert!(handle.close());
        assert!(!handle.close());
        chunk_tx.send(b"more".to_vec()).unwrap();
        drop(chunk_tx);

        assert_eq!(handle.wait(), Phase::Aborted);
        assert!(done_rx.try_recv().is_err());
        let events = hooks.recorder.events();
        assert_eq!(events.iter().filter(|e| *e == "abort").count(), 1);
        assert!(!events.contains(&"complete".to_string()));
    }
}
