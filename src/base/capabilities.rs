//! Feature switches resolved once when a client is built.

use crate::http::auth::AuthScheme;
use std::net::SocketAddr;

/// Looks up the certificate a downstream client presented on the inbound
/// connection identified by its peer address. Returns DER bytes.
pub type ClientCertResolver = fn(SocketAddr) -> Option<Vec<u8>>;

/// What this client instance is allowed to do.
///
/// Picked at `ClientBuilder::build` and never consulted through reflection
/// or global state afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub basic_auth: bool,
    pub digest_auth: bool,
    pub ntlm_auth: bool,
    /// When false, stream bodies are buffered before sending. Framing still
    /// follows the declared length.
    pub streaming_bodies: bool,
    pub client_certificate: Option<ClientCertResolver>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            basic_auth: true,
            digest_auth: true,
            ntlm_auth: true,
            streaming_bodies: true,
            client_certificate: None,
        }
    }
}

impl Capabilities {
    pub fn supports(&self, scheme: AuthScheme) -> bool {
        match scheme {
            AuthScheme::Basic => self.basic_auth,
            AuthScheme::Digest => self.digest_auth,
            AuthScheme::Ntlm => self.ntlm_auth,
        }
    }

    pub fn without_scheme(mut self, scheme: AuthScheme) -> Self {
        match scheme {
            AuthScheme::Basic => self.basic_auth = false,
            AuthScheme::Digest => self.digest_auth = false,
            AuthScheme::Ntlm => self.ntlm_auth = false,
        }
        self
    }

    pub fn with_client_certificate(mut self, resolver: ClientCertResolver) -> Self {
        self.client_certificate = Some(resolver);
        self
    }
}
