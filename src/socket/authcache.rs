//! HTTP Authentication Cache for proxy and server credentials.
//!
//! Remembers credentials that worked, keyed by host:port + realm, and the
//! Digest sessions whose nonce can be reused. Based on Chromium's
//! HttpAuthCache.

use crate::http::auth::digest::DigestSession;
use crate::http::auth::{AuthScheme, AuthTarget, CredentialSource, Credentials};
use crate::http::request::Origin;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Cached authentication entry.
#[derive(Debug, Clone)]
pub struct AuthEntry {
    pub scheme: AuthScheme,
    /// Realm from WWW-Authenticate or Proxy-Authenticate header
    pub realm: String,
    pub credentials: Credentials,
}

/// Thread-safe authentication cache.
#[derive(Clone, Default)]
pub struct AuthCache {
    entries: Arc<DashMap<String, AuthEntry>>,
    digest: Arc<DashMap<String, Arc<DigestSession>>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(host: &str, port: u16, realm: &str) -> String {
        format!("{}:{}:{}", host.to_lowercase(), port, realm)
    }

    fn digest_key(origin: &Origin, target: AuthTarget) -> String {
        let prefix = match target {
            AuthTarget::Server => "server",
            AuthTarget::Proxy => "proxy",
        };
        format!("{}|{}:{}", prefix, origin.host.to_lowercase(), origin.port)
    }

    /// Lookup cached credentials for a host and realm.
    pub fn lookup(&self, host: &str, port: u16, realm: &str) -> Option<AuthEntry> {
        self.entries
            .get(&Self::key(host, port, realm))
            .map(|e| e.clone())
    }

    /// Store credentials for a host and realm.
    pub fn store(&self, host: &str, port: u16, entry: AuthEntry) {
        trace!(host, port, realm = %entry.realm, scheme = %entry.scheme, "caching credentials");
        self.entries
            .insert(Self::key(host, port, &entry.realm), entry);
    }

    /// Remember credentials that were accepted by `origin`.
    pub fn remember(
        &self,
        origin: &Origin,
        scheme: AuthScheme,
        realm: Option<&str>,
        credentials: &Credentials,
    ) {
        self.store(
            &origin.host,
            origin.port,
            AuthEntry {
                scheme,
                realm: realm.unwrap_or_default().to_string(),
                credentials: credentials.clone(),
            },
        );
    }

    /// Digest session to reuse for `origin`, if one is cached.
    pub fn digest_session(&self, origin: &Origin, target: AuthTarget) -> Option<Arc<DigestSession>> {
        self.digest
            .get(&Self::digest_key(origin, target))
            .map(|s| Arc::clone(&s))
    }

    pub fn store_digest(&self, origin: &Origin, target: AuthTarget, session: Arc<DigestSession>) {
        self.digest.insert(Self::digest_key(origin, target), session);
    }

    /// Forget the Digest session after the server refused its nonce.
    pub fn invalidate_digest(&self, origin: &Origin, target: AuthTarget) {
        self.digest.remove(&Self::digest_key(origin, target));
    }

    /// Remove credentials and Digest sessions for a host (all realms).
    pub fn remove_host(&self, host: &str, port: u16) {
        let prefix = format!("{}:{}:", host.to_lowercase(), port);
        self.entries.retain(|k, _| !k.starts_with(&prefix));
        let suffix = format!("|{}:{}", host.to_lowercase(), port);
        self.digest.retain(|k, _| !k.ends_with(&suffix));
    }

    /// Clear all cached credentials.
    pub fn clear(&self) {
        self.entries.clear();
        self.digest.clear();
    }

    /// Number of cached credential entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialSource for AuthCache {
    fn credentials(
        &self,
        scheme: AuthScheme,
        realm: Option<&str>,
        origin: &Origin,
    ) -> Option<Credentials> {
        let entry = match realm {
            Some(realm) => self.lookup(&origin.host, origin.port, realm),
            // NTLM has no realm: take whatever the host accepted before.
            None => {
                let prefix = format!("{}:{}:", origin.host.to_lowercase(), origin.port);
                self.entries
                    .iter()
                    .find(|e| e.key().starts_with(&prefix) && e.value().scheme == scheme)
                    .map(|e| e.value().clone())
            }
        };
        entry
            .filter(|e| e.scheme == scheme)
            .map(|e| e.credentials)
    }
}

impl std::fmt::Debug for AuthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCache")
            .field("entries", &self.entries.len())
            .field("digest_sessions", &self.digest.len())
            .finish()
    }
}
