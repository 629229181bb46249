//! Response accumulation and body decoding.
//!
//! # Design
//! Chunks are kept in arrival order and concatenated once the transport
//! reports end of body. Decoding looks only at the declared content type:
//! anything mentioning `json` is parsed with `serde_json`, everything else is
//! returned as raw bytes.

use std::borrow::Cow;

use crate::error::ClientError;
use crate::http::ResponseHead;

/// Ordered chunks received so far plus their running total length.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    chunks: Vec<Vec<u8>>,
    size: usize,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.size += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate every chunk into one contiguous buffer.
    pub fn finish(self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.size);
        for chunk in self.chunks {
            body.extend_from_slice(&chunk);
        }
        body
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResult {
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

impl ParsedResult {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ParsedResult::Json(value) => Some(value),
            ParsedResult::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParsedResult::Raw(bytes) => Some(bytes),
            ParsedResult::Json(_) => None,
        }
    }

    /// Raw body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        self.as_bytes().map(String::from_utf8_lossy)
    }
}

/// Outcome of a completed exchange. Non-2xx statuses are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub head: ResponseHead,
    pub body: ParsedResult,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.head.status
    }
}

pub fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}

/// Decode a finished body according to the response content type.
pub fn decode(content_type: Option<&str>, body: Vec<u8>) -> Result<ParsedResult, ClientError> {
    if is_json(content_type) {
        serde_json::from_slice(&body)
            .map(ParsedResult::Json)
            .map_err(|e| ClientError::Decode(e.to_string()))
    } else {
        Ok(ParsedResult::Raw(body))
    }
}
