//! Error types for the HTTP client.
//!
//! # Design
//! Every failure reaches the caller as a `ClientError`, either returned
//! directly (encoding problems, before any I/O) or passed to the completion
//! callback. Network and decode failures are separate variants so callers
//! can tell "the server never answered" from "the server answered with
//! something that claims to be JSON but is not."

use thiserror::Error;

/// Errors surfaced by the request builder and the exchange adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The URL could not be parsed, has no host, or uses an unsupported scheme.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request description is self-contradictory, e.g. files combined
    /// with a raw body.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Connection or transport failure, carrying the transport's description.
    #[error("network error: {0}")]
    Network(String),

    /// The response declared a JSON content type but the body did not parse.
    #[error("response body is not valid JSON: {0}")]
    Decode(String),

    /// The exchange was cancelled by the caller. Never delivered to a
    /// completion callback.
    #[error("exchange aborted")]
    Aborted,
}
