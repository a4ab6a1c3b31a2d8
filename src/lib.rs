//! # relaynet
//!
//! Wire-exact HTTP/1.1 request forwarding, in the shape of Chromium's
//! network stack.
//!
//! `relaynet` forwards requests as an outbound client, as a reverse proxy,
//! or through a forward proxy's `CONNECT` tunnel, and keeps what goes on the
//! wire exactly as the caller described it.
//!
//! ## Features
//!
//! - **Framing**: `Content-Length` or chunked, derived from the body every time it changes
//! - **Headers**: casing, order and repeated values preserved byte for byte
//! - **Authentication**: Basic, Digest (with nonce reuse) and NTLMv2, for servers and proxies
//! - **Tunnels**: `CONNECT` with proxy auth, TLS verified against the target host
//! - **Redirects**: method rewriting, body preservation and credential stripping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relaynet::{AuthConfig, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relaynet::RequestError> {
//!     let client = Client::new()?;
//!     let response = client
//!         .get("https://intranet.example/report?year=2024&year=2025")
//!         .header("X-Request-ID", "r-17")
//!         .auth(AuthConfig::ntlm("alice", "secret").with_domain("CORP"))
//!         .send()
//!         .await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes, load states, deadlines and capabilities
//! - [`http`] - Normalization, framing, wire codec, auth and redirects
//! - [`socket`] - Transport, TLS, proxies and tunnels
//! - [`reverse`] - Reverse proxy mode
//! - [`client`] - High-level request API

pub mod base;
pub mod client;
pub mod http;
pub mod options;
pub mod reverse;
pub mod socket;

// Re-exports for convenience
pub use base::capabilities::Capabilities;
pub use base::loadstate::{LoadState, LoadStateReporter};
pub use base::neterror::{ErrorCategory, NetError, RequestError};
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use http::auth::{AuthConfig, AuthScheme, CredentialSource, Credentials, StaticCredentials};
pub use http::{BodyDescriptor, HeaderSet, InboundResponse, OutboundRequest, QueryParams, StreamingPolicy};
pub use options::{Options, OptionsConfig};
pub use reverse::{InboundRequest, RequestTransform, ReverseProxy};
pub use socket::proxy::ProxyConfig;
pub use socket::tls::TlsConfig;
