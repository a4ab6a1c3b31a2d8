//! HTTP authentication: Basic, Digest and NTLM.
//!
//! Mirrors the split in Chromium's `net/http/http_auth*`: challenge parsing
//! and per-scheme token generation live in the scheme modules, while
//! [`negotiator::AuthNegotiator`] drives the challenge/response exchange for
//! both origin servers (401) and proxies (407).

pub mod basic;
pub mod digest;
pub mod negotiator;
pub mod ntlm;
pub mod session;

use crate::base::neterror::{NetError, RequestError};
use crate::http::headers::HeaderSet;
use crate::http::request::Origin;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

pub use digest::DigestChallenge;
pub use negotiator::{AuthNegotiator, AuthState, Exchange, ExchangeOutcome};
pub use session::AuthSession;

/// Authentication schemes understood by the negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
}

impl AuthScheme {
    /// Scheme token as written in challenge and credential headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
            AuthScheme::Ntlm => "NTLM",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("basic") {
            Some(AuthScheme::Basic)
        } else if token.eq_ignore_ascii_case("digest") {
            Some(AuthScheme::Digest)
        } else if token.eq_ignore_ascii_case("ntlm") {
            Some(AuthScheme::Ntlm)
        } else {
            None
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTarget {
    /// The origin server: 401, `WWW-Authenticate`, `Authorization`.
    Server,
    /// A forward proxy: 407, `Proxy-Authenticate`, `Proxy-Authorization`.
    Proxy,
}

impl AuthTarget {
    pub fn challenge_status(&self) -> StatusCode {
        match self {
            AuthTarget::Server => StatusCode::UNAUTHORIZED,
            AuthTarget::Proxy => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        }
    }

    pub fn challenge_header(&self) -> &'static str {
        match self {
            AuthTarget::Server => "WWW-Authenticate",
            AuthTarget::Proxy => "Proxy-Authenticate",
        }
    }

    pub fn authorization_header(&self) -> &'static str {
        match self {
            AuthTarget::Server => "Authorization",
            AuthTarget::Proxy => "Proxy-Authorization",
        }
    }
}

/// Username and password, plus the NTLM domain and workstation.
///
/// The password is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
    domain: Option<String>,
    workstation: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            domain: None,
            workstation: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = Some(workstation.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn workstation(&self) -> Option<&str> {
        self.workstation.as_deref()
    }

    /// Domain and user for NTLM. A `DOMAIN\user` username is split when no
    /// explicit domain was given. The domain may be empty.
    pub fn ntlm_identity(&self) -> (&str, &str) {
        if let Some(domain) = self.domain.as_deref() {
            return (domain, &self.username);
        }
        match self.username.split_once('\\') {
            Some((domain, user)) => (domain, user),
            None => ("", &self.username),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("workstation", &self.workstation)
            .finish()
    }
}

/// Supplies credentials when a challenge arrives.
pub trait CredentialSource: Send + Sync {
    /// `None` means none are available; the negotiation then fails without
    /// sending another request.
    fn credentials(
        &self,
        scheme: AuthScheme,
        realm: Option<&str>,
        origin: &Origin,
    ) -> Option<Credentials>;
}

/// The same credentials for every challenge.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialSource for StaticCredentials {
    fn credentials(&self, _: AuthScheme, _: Option<&str>, _: &Origin) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// Never has credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn credentials(&self, _: AuthScheme, _: Option<&str>, _: &Origin) -> Option<Credentials> {
        None
    }
}

/// Authentication to perform for a request or a proxy.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub scheme: AuthScheme,
    /// When absent, the client's [`CredentialSource`] is asked.
    pub credentials: Option<Credentials>,
    /// Send Basic credentials before any challenge.
    pub preemptive: bool,
}

impl AuthConfig {
    pub fn new(scheme: AuthScheme) -> Self {
        Self {
            scheme,
            credentials: None,
            preemptive: false,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthScheme::Basic).with_credentials(Credentials::new(username, password))
    }

    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthScheme::Digest).with_credentials(Credentials::new(username, password))
    }

    pub fn ntlm(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthScheme::Ntlm).with_credentials(Credentials::new(username, password))
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.credentials = self.credentials.map(|c| c.with_domain(domain));
        self
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.credentials = self.credentials.map(|c| c.with_workstation(workstation));
        self
    }

    pub fn preemptive(mut self, preemptive: bool) -> Self {
        self.preemptive = preemptive;
        self
    }
}

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Basic { realm: Option<String> },
    Digest(DigestChallenge),
    /// Bare `NTLM` starts a handshake; with a token it carries the type 2
    /// message.
    Ntlm { token: Option<Vec<u8>> },
}

impl AuthChallenge {
    /// Parse one challenge.
    pub fn parse(value: &str) -> Result<Self, RequestError> {
        let value = value.trim();
        let (token, rest) = match value.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim()),
            None => (value, ""),
        };
        match AuthScheme::from_token(token) {
            Some(AuthScheme::Basic) => Ok(AuthChallenge::Basic {
                realm: basic::parse_realm(rest),
            }),
            Some(AuthScheme::Digest) => Ok(AuthChallenge::Digest(DigestChallenge::parse(rest)?)),
            Some(AuthScheme::Ntlm) => {
                if rest.is_empty() {
                    return Ok(AuthChallenge::Ntlm { token: None });
                }
                let token = STANDARD.decode(rest).map_err(|e| {
                    RequestError::new(
                        NetError::InvalidAuthChallenge,
                        format!("NTLM challenge is not base64: {}", e),
                    )
                })?;
                Ok(AuthChallenge::Ntlm { token: Some(token) })
            }
            None => Err(RequestError::new(
                NetError::UnsupportedAuthScheme,
                format!("unsupported auth scheme {:?}", token),
            )),
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        match self {
            AuthChallenge::Basic { .. } => AuthScheme::Basic,
            AuthChallenge::Digest(_) => AuthScheme::Digest,
            AuthChallenge::Ntlm { .. } => AuthScheme::Ntlm,
        }
    }

    pub fn realm(&self) -> Option<&str> {
        match self {
            AuthChallenge::Basic { realm } => realm.as_deref(),
            AuthChallenge::Digest(d) => Some(d.realm()),
            AuthChallenge::Ntlm { .. } => None,
        }
    }
}

/// Split a header value that may hold several challenges
/// (`Basic realm="a", Digest realm="b", nonce="n"`).
pub fn split_challenges(value: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in digest::split_params(value) {
        let first = part.split_whitespace().next().unwrap_or_default();
        let starts_challenge = !first.contains('=') || out.is_empty();
        if starts_challenge {
            out.push(part.to_string());
        } else if let Some(last) = out.last_mut() {
            last.push_str(", ");
            last.push_str(part);
        }
    }
    out
}

/// Find the challenge for `scheme` among the target's challenge headers.
pub fn find_challenge(
    headers: &HeaderSet,
    target: AuthTarget,
    scheme: AuthScheme,
) -> Result<AuthChallenge, RequestError> {
    let header = target.challenge_header();
    let mut offered = Vec::new();
    for value in headers.get_all(header) {
        for challenge in split_challenges(value) {
            let token = challenge.split_whitespace().next().unwrap_or_default().to_string();
            if AuthScheme::from_token(&token) == Some(scheme) {
                return AuthChallenge::parse(&challenge);
            }
            offered.push(token);
        }
    }
    if offered.is_empty() {
        return Err(RequestError::new(
            NetError::InvalidAuthChallenge,
            format!("{} response without {}", target.challenge_status(), header),
        ));
    }
    Err(RequestError::new(
        NetError::UnsupportedAuthScheme,
        format!("{} not offered (server offered {})", scheme, offered.join(", ")),
    ))
}
