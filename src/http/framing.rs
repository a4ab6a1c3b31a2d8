//! Choice between `Content-Length` and chunked framing.
//!
//! Framing is always derived from the body that is actually sent, never from
//! headers the caller supplied. Any step that replaces the body must resolve
//! again; [`crate::http::request::OutboundRequest::freeze`] does so.

use crate::http::requestbody::BodyDescriptor;
use http::Method;
use serde::{Deserialize, Serialize};

/// Whether a request body is sent at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingPolicy {
    /// Send a body unless the method conventionally has none
    /// (GET, HEAD, OPTIONS).
    #[default]
    Auto,
    /// Always send a body, even an empty one (`Content-Length: 0`).
    Always,
    /// Never send a body.
    Never,
}

impl StreamingPolicy {
    pub fn sends_body(self, method: &Method) -> bool {
        match self {
            StreamingPolicy::Always => true,
            StreamingPolicy::Never => false,
            StreamingPolicy::Auto => {
                !(*method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS)
            }
        }
    }
}

/// How the body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramingDecision {
    /// No body and no framing header.
    NoBody,
    ContentLength(u64),
    Chunked,
}

impl FramingDecision {
    /// The single framing header to emit, if any.
    pub fn header(&self) -> Option<(&'static str, String)> {
        match self {
            FramingDecision::NoBody => None,
            FramingDecision::ContentLength(n) => Some(("Content-Length", n.to_string())),
            FramingDecision::Chunked => Some(("Transfer-Encoding", "chunked".to_string())),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, FramingDecision::Chunked)
    }

    pub fn sends_body(&self) -> bool {
        !matches!(self, FramingDecision::NoBody)
    }
}

/// Pick the framing for `body`. Deterministic in its inputs.
pub fn resolve(body: &BodyDescriptor, policy: StreamingPolicy, method: &Method) -> FramingDecision {
    if !policy.sends_body(method) {
        return FramingDecision::NoBody;
    }
    match body {
        BodyDescriptor::Empty => match policy {
            StreamingPolicy::Always => FramingDecision::ContentLength(0),
            _ => FramingDecision::NoBody,
        },
        BodyDescriptor::Fixed(bytes) => FramingDecision::ContentLength(bytes.len() as u64),
        BodyDescriptor::Stream(s) => match s.known_length() {
            Some(n) => FramingDecision::ContentLength(n),
            None => FramingDecision::Chunked,
        },
    }
}
