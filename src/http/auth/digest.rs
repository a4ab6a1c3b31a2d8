//! HTTP Digest Authentication (RFC 7616, RFC 2617).
//!
//! Mirrors Chromium's `net/http/http_auth_handler_digest.cc`.
//!
//! ## Supported Features
//! - MD5 and SHA-256 algorithms, plus their `-sess` variants
//! - qop=auth, and qop=auth-int when the body is held in memory
//! - Nonce reuse: a [`DigestSession`] keeps the server nonce and hands out a
//!   strictly increasing nonce count
//! - userhash

use crate::base::neterror::{NetError, RequestError};
use crate::http::auth::Credentials;
use boring::hash::{hash, MessageDigest};
use std::sync::atomic::{AtomicU32, Ordering};

/// Digest authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Unspecified - defaults to MD5
    #[default]
    Unspecified,
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn from_token(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    /// Get the algorithm name for the Authorization header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            _ => MessageDigest::md5(),
        }
    }
}

/// Quality of Protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qop {
    /// No qop offered (RFC 2069 compatibility)
    #[default]
    Unspecified,
    /// Authentication only
    Auth,
    /// Authentication with integrity
    AuthInt,
}

impl Qop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
        }
    }
}

/// A parsed `Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    domain: Option<String>,
    algorithm: DigestAlgorithm,
    qop: Qop,
    /// Nonce expired but the credentials were fine.
    stale: bool,
    userhash: bool,
}

impl DigestChallenge {
    /// Parse the parameters that follow `Digest `.
    ///
    /// # Example
    /// ```ignore
    /// let challenge = DigestChallenge::parse(
    ///     r#"realm="test", nonce="abc123", qop="auth", algorithm=MD5"#
    /// )?;
    /// ```
    pub fn parse(params: &str) -> Result<Self, RequestError> {
        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            opaque: None,
            domain: None,
            algorithm: DigestAlgorithm::default(),
            qop: Qop::default(),
            stale: false,
            userhash: false,
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "domain" => challenge.domain = Some(value.to_string()),
                "algorithm" => {
                    challenge.algorithm = DigestAlgorithm::from_token(value).ok_or_else(|| {
                        RequestError::new(
                            NetError::UnsupportedAuthScheme,
                            format!("unsupported digest algorithm {:?}", value),
                        )
                    })?;
                }
                "qop" => {
                    // Prefer "auth"; fall back to "auth-int" when it is all
                    // the server offers.
                    for qop in value.split(',').map(str::trim) {
                        if qop.eq_ignore_ascii_case("auth") {
                            challenge.qop = Qop::Auth;
                            break;
                        }
                        if qop.eq_ignore_ascii_case("auth-int") {
                            challenge.qop = Qop::AuthInt;
                        }
                    }
                }
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                "userhash" => challenge.userhash = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if challenge.nonce.is_empty() {
            return Err(RequestError::new(
                NetError::InvalidAuthChallenge,
                "digest challenge without nonce",
            ));
        }

        Ok(challenge)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn opaque(&self) -> Option<&str> {
        self.opaque.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn qop(&self) -> Qop {
        self.qop
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Compute the `response` parameter.
    ///
    /// `body` is only consulted for qop=auth-int.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_response(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
        nc: &str,
        body: Option<&[u8]>,
    ) -> Result<String, RequestError> {
        // HA1 = H(user:realm:password)
        let mut ha1 = self.hex_hash(format!("{}:{}:{}", username, self.realm, password).as_bytes())?;

        // Session algorithms: HA1 = H(H(user:realm:pass):nonce:cnonce)
        if self.algorithm.is_session() {
            ha1 = self.hex_hash(format!("{}:{}:{}", ha1, self.nonce, cnonce).as_bytes())?;
        }

        let ha2 = match self.qop {
            Qop::AuthInt => {
                let body = body.ok_or_else(|| {
                    RequestError::new(
                        NetError::UnsupportedAuthScheme,
                        "qop=auth-int needs the request body in memory",
                    )
                })?;
                let body_hash = self.hex_hash(body)?;
                self.hex_hash(format!("{}:{}:{}", method, uri, body_hash).as_bytes())?
            }
            _ => self.hex_hash(format!("{}:{}", method, uri).as_bytes())?,
        };

        let input = if self.qop != Qop::Unspecified {
            format!(
                "{}:{}:{}:{}:{}:{}",
                ha1,
                self.nonce,
                nc,
                cnonce,
                self.qop.as_str(),
                ha2
            )
        } else {
            format!("{}:{}:{}", ha1, self.nonce, ha2)
        };

        self.hex_hash(input.as_bytes())
    }

    fn hex_hash(&self, input: &[u8]) -> Result<String, RequestError> {
        let digest = hash(self.algorithm.message_digest(), input).map_err(|e| {
            RequestError::new(NetError::InvalidAuthCredentials, format!("digest hash: {}", e))
                .with_source(e)
        })?;
        Ok(to_hex(&digest))
    }

    /// Check an `Authorization: Digest ...` value against this challenge.
    /// Used by origin-side code (and test servers) that issued the challenge.
    pub fn verify(
        &self,
        authorization: &str,
        method: &str,
        password: &str,
        body: Option<&[u8]>,
    ) -> Result<bool, RequestError> {
        let params = authorization
            .trim()
            .strip_prefix("Digest ")
            .ok_or_else(|| RequestError::new(NetError::InvalidAuthCredentials, "not a Digest credential"))?;
        let mut username = "";
        let mut uri = "";
        let mut response = "";
        let mut nonce = "";
        let mut cnonce = "";
        let mut nc = "";
        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_ascii_lowercase().as_str() {
                "username" => username = value,
                "uri" => uri = value,
                "response" => response = value,
                "nonce" => nonce = value,
                "cnonce" => cnonce = value,
                "nc" => nc = value,
                _ => {}
            }
        }
        if nonce != self.nonce {
            return Ok(false);
        }
        let expected = self.compute_response(method, uri, username, password, cnonce, nc, body)?;
        Ok(expected == response)
    }
}

/// Cached Digest state for one origin and realm.
///
/// Shared between requests; the nonce count is advanced atomically so no two
/// requests ever send the same `nc`.
#[derive(Debug)]
pub struct DigestSession {
    challenge: DigestChallenge,
    nonce_count: AtomicU32,
}

impl DigestSession {
    pub fn new(challenge: DigestChallenge) -> Self {
        Self {
            challenge,
            nonce_count: AtomicU32::new(0),
        }
    }

    pub fn challenge(&self) -> &DigestChallenge {
        &self.challenge
    }

    /// Nonce counts handed out so far.
    pub fn nonce_count(&self) -> u32 {
        self.nonce_count.load(Ordering::SeqCst)
    }

    /// Build the `Authorization` value for the next request, consuming one
    /// nonce count.
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        credentials: &Credentials,
        body: Option<&[u8]>,
    ) -> Result<String, RequestError> {
        let count = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;
        let nc = format!("{:08x}", count);
        let cnonce = generate_cnonce()?;
        let challenge = &self.challenge;

        let response = challenge.compute_response(
            method,
            uri,
            credentials.username(),
            credentials.password(),
            &cnonce,
            &nc,
            body,
        )?;

        let username = if challenge.userhash {
            challenge.hex_hash(format!("{}:{}", credentials.username(), challenge.realm).as_bytes())?
        } else {
            credentials.username().to_string()
        };

        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            username, challenge.realm, challenge.nonce, uri
        );

        if challenge.algorithm != DigestAlgorithm::Unspecified {
            auth.push_str(&format!(", algorithm={}", challenge.algorithm.as_str()));
        }

        auth.push_str(&format!(", response=\"{}\"", response));

        if let Some(ref opaque) = challenge.opaque {
            auth.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        if challenge.qop != Qop::Unspecified {
            auth.push_str(&format!(
                ", qop={}, nc={}, cnonce=\"{}\"",
                challenge.qop.as_str(),
                nc,
                cnonce
            ));
        }

        if challenge.userhash {
            auth.push_str(", userhash=true");
        }

        Ok(auth)
    }
}

/// 16 hex chars, like Chromium.
fn generate_cnonce() -> Result<String, RequestError> {
    let mut bytes = [0u8; 8];
    boring::rand::rand_bytes(&mut bytes).map_err(|e| {
        RequestError::new(NetError::InvalidAuthCredentials, format!("cnonce: {}", e)).with_source(e)
    })?;
    Ok(to_hex(&bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Split a comma-separated parameter list, leaving commas inside quoted
/// strings alone.
pub fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = header[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let part = header[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }

    parts
}

/// Parse a single key=value or key="value" parameter.
pub fn parse_param(param: &str) -> Result<(&str, &str), RequestError> {
    let (key, value) = param.split_once('=').ok_or_else(|| {
        RequestError::new(
            NetError::InvalidAuthChallenge,
            format!("malformed auth parameter {:?}", param),
        )
    })?;
    let mut value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }
    Ok((key.trim(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc2617() -> DigestChallenge {
        DigestChallenge::parse(
            r#"realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_challenge() {
        let c = rfc2617();
        assert_eq!(c.realm(), "testrealm@host.com");
        assert_eq!(c.nonce(), "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(c.opaque(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(c.qop(), Qop::Auth);
        assert_eq!(c.algorithm(), DigestAlgorithm::Unspecified);
    }

    #[test]
    fn test_parse_with_algorithm() {
        let c = DigestChallenge::parse(r#"realm="test", nonce="abc", algorithm=SHA-256"#).unwrap();
        assert_eq!(c.algorithm(), DigestAlgorithm::Sha256);

        let err = DigestChallenge::parse(r#"realm="test", nonce="abc", algorithm=SHA-1"#).unwrap_err();
        assert_eq!(err.code(), NetError::UnsupportedAuthScheme);
    }

    #[test]
    fn test_auth_int_only() {
        let c = DigestChallenge::parse(r#"realm="r", nonce="n", qop="auth-int""#).unwrap();
        assert_eq!(c.qop(), Qop::AuthInt);
    }

    #[test]
    fn test_parse_stale() {
        let c = DigestChallenge::parse(r#"realm="test", nonce="abc", stale=TRUE"#).unwrap();
        assert!(c.is_stale());
    }

    #[test]
    fn test_missing_nonce_fails() {
        let err = DigestChallenge::parse(r#"realm="test""#).unwrap_err();
        assert_eq!(err.code(), NetError::InvalidAuthChallenge);
    }

    #[test]
    fn test_rfc2617_response() {
        let response = rfc2617()
            .compute_response(
                "GET",
                "/dir/index.html",
                "Mufasa",
                "Circle Of Life",
                "0a4f113b",
                "00000001",
                None,
            )
            .unwrap();
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_authorization_header() {
        let session = DigestSession::new(rfc2617());
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let token = session
            .authorization("GET", "/dir/index.html", &creds, None)
            .unwrap();

        assert!(token.starts_with("Digest username=\"Mufasa\""));
        assert!(token.contains("realm=\"testrealm@host.com\""));
        assert!(token.contains("nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\""));
        assert!(token.contains("uri=\"/dir/index.html\""));
        assert!(token.contains("response=\""));
        assert!(token.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
        assert!(token.contains("qop=auth, nc=00000001"));
        assert!(rfc2617().verify(&token, "GET", "Circle Of Life", None).unwrap());
        assert!(!rfc2617().verify(&token, "GET", "wrong", None).unwrap());
    }

    #[test]
    fn test_nonce_count_increments() {
        let session = DigestSession::new(DigestChallenge::parse(r#"realm="t", nonce="abc", qop="auth""#).unwrap());
        let creds = Credentials::new("u", "p");

        let first = session.authorization("GET", "/", &creds, None).unwrap();
        let second = session.authorization("GET", "/", &creds, None).unwrap();

        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert_eq!(session.nonce_count(), 2);
    }

    #[test]
    fn test_auth_int_needs_body() {
        let session = DigestSession::new(DigestChallenge::parse(r#"realm="t", nonce="n", qop="auth-int""#).unwrap());
        let creds = Credentials::new("u", "p");
        let err = session.authorization("POST", "/", &creds, None).unwrap_err();
        assert_eq!(err.code(), NetError::UnsupportedAuthScheme);

        let token = session.authorization("POST", "/", &creds, Some(b"payload")).unwrap();
        assert!(token.contains("qop=auth-int"));
        assert!(session.challenge().verify(&token, "POST", "p", Some(b"payload")).unwrap());
        assert!(!session.challenge().verify(&token, "POST", "p", Some(b"tampered")).unwrap());
    }

    #[test]
    fn test_userhash() {
        let session = DigestSession::new(
            DigestChallenge::parse(r#"realm="r", nonce="n", qop="auth", userhash=true"#).unwrap(),
        );
        let token = session
            .authorization("GET", "/", &Credentials::new("u", "p"), None)
            .unwrap();
        assert!(!token.contains("username=\"u\""));
        assert!(token.ends_with("userhash=true"));
    }

    #[test]
    fn test_hex_hash_md5() {
        let c = DigestChallenge::parse(r#"nonce="n", algorithm=MD5"#).unwrap();
        // MD5("test") = 098f6bcd4621d373cade4e832627b4f6
        assert_eq!(c.hex_hash(b"test").unwrap(), "098f6bcd4621d373cade4e832627b4f6");
    }

    #[test]
    fn test_hex_hash_sha256() {
        let c = DigestChallenge::parse(r#"nonce="n", algorithm=SHA-256"#).unwrap();
        assert_eq!(
            c.hex_hash(b"test").unwrap(),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_split_params_respects_quotes() {
        assert_eq!(
            split_params(r#"realm="a, b", nonce="x\"y,z", qop=auth"#),
            vec![r#"realm="a, b""#, r#"nonce="x\"y,z""#, "qop=auth"]
        );
    }
}
