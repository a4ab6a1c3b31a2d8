//! HTTP/1.1 request forwarding.
//!
//! Modeled on Chromium's `net/http/`, trimmed to what forwarding one
//! request over HTTP/1.1 takes:
//! - [`normalizer`], [`headers`] and [`query`]: caller input in wire-ready form
//! - [`framing`]: `Content-Length` versus chunked, decided from the body
//! - [`wire`]: the hand-written request serializer and response parser
//! - [`auth`]: Basic, Digest and NTLM negotiation
//! - [`redirect`]: rebuilding requests across 3xx hops
//! - [`transaction`]: one operation from start to final response

pub mod auth;
pub mod framing;
pub mod headers;
pub mod normalizer;
pub mod query;
pub mod redirect;
pub mod request;
pub mod requestbody;
pub mod response;
pub mod transaction;
pub mod wire;

// Re-exports for convenience
pub use framing::{FramingDecision, StreamingPolicy};
pub use headers::HeaderSet;
pub use query::QueryParams;
pub use request::{OutboundRequest, Origin};
pub use requestbody::BodyDescriptor;
pub use response::InboundResponse;
pub use transaction::Transaction;
