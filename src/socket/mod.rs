//! Socket and connection management.
//!
//! Mirrors the parts of Chromium's `net/socket/` that a single forwarding
//! operation needs:
//! - [`transport`]: DNS, TCP and the [`Connection`](transport::Connection) wrapper
//! - [`tls`]: TLS upgrade with BoringSSL
//! - [`proxy`] and [`matcher`]: forward proxy settings and exclusion lists
//! - [`tunnel`]: `CONNECT` tunnels, including proxy authentication
//! - [`authcache`]: credentials and Digest sessions shared across requests

pub mod authcache;
pub mod matcher;
pub mod proxy;
pub mod stream;
pub mod tls;
pub mod transport;
pub mod tunnel;
