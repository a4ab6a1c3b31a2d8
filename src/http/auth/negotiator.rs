//! Challenge/response driver.
//!
//! One negotiator runs one request through its scheme's message sequence:
//!
//! ```text
//! Unauthenticated -> Challenged -> Responding -> Authenticated
//!                                            \-> Failed
//! ```
//!
//! The same code serves origin servers (401, `WWW-Authenticate`) and forward
//! proxies (407, `Proxy-Authenticate`); [`AuthTarget`] picks the headers.
//! Resends are bounded: one for Basic and Digest, the three-message count
//! for NTLM with a single restart when the connection drops mid-handshake.

use crate::base::neterror::{NetError, RequestError};
use crate::http::auth::digest::DigestSession;
use crate::http::auth::session::{AuthSession, NtlmPhase};
use crate::http::auth::{
    basic, find_challenge, ntlm, AuthChallenge, AuthConfig, AuthScheme, AuthTarget,
    CredentialSource, Credentials,
};
use crate::http::request::{OutboundRequest, Origin};
use crate::http::response::InboundResponse;
use crate::http::wire::TargetForm;
use crate::socket::authcache::AuthCache;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    /// A challenge for the configured scheme was parsed.
    Challenged,
    /// A request carrying credentials is in flight.
    Responding,
    Authenticated,
    Failed,
}

/// What one request/response round trip produced.
pub struct ExchangeOutcome {
    pub response: InboundResponse,
    /// Connection the response arrived on.
    pub connection_id: u64,
    pub session: Arc<AuthSession>,
}

/// Sends one request and reads its response.
///
/// Implemented by the transaction (origin auth) and by the tunnel
/// establisher (CONNECT to a proxy).
#[async_trait]
pub trait Exchange: Send {
    async fn exchange(&mut self, request: &OutboundRequest) -> Result<ExchangeOutcome, RequestError>;

    /// Called before a request carrying credentials is sent.
    fn authenticating(&mut self) {}
}

pub struct AuthNegotiator<'a> {
    target: AuthTarget,
    config: AuthConfig,
    origin: Origin,
    source: &'a dyn CredentialSource,
    cache: &'a AuthCache,
    form: TargetForm,
    encode_query: bool,
    state: AuthState,
    requests_sent: u32,
}

impl<'a> AuthNegotiator<'a> {
    /// `origin` is whoever issues the challenges: the server, or the proxy.
    pub fn new(
        target: AuthTarget,
        config: AuthConfig,
        origin: Origin,
        source: &'a dyn CredentialSource,
        cache: &'a AuthCache,
    ) -> Self {
        Self {
            target,
            config,
            origin,
            source,
            cache,
            form: TargetForm::Origin,
            encode_query: true,
            state: AuthState::Unauthenticated,
            requests_sent: 0,
        }
    }

    /// How the request target is written; Digest signs the same string.
    pub fn with_target_form(mut self, form: TargetForm) -> Self {
        self.form = form;
        self
    }

    pub fn with_encode_query(mut self, encode_query: bool) -> Self {
        self.encode_query = encode_query;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Requests handed to the exchange so far.
    pub fn requests_sent(&self) -> u32 {
        self.requests_sent
    }

    /// Send `request`, answering challenges for the configured scheme.
    ///
    /// Returns the first response that is not a challenge. A challenge that
    /// survives the allowed resends fails with the response attached.
    pub async fn run<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        request: OutboundRequest,
    ) -> Result<InboundResponse, RequestError> {
        debug!(
            target = ?self.target,
            scheme = %self.config.scheme,
            origin = %self.origin,
            "auth negotiation"
        );
        let result = match self.config.scheme {
            AuthScheme::Basic => self.run_basic(exchange, request).await,
            AuthScheme::Digest => self.run_digest(exchange, request).await,
            AuthScheme::Ntlm => self.run_ntlm(exchange, request).await,
        };
        if result.is_err() {
            self.transition(AuthState::Failed);
        }
        result
    }

    async fn run_basic<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        request: OutboundRequest,
    ) -> Result<InboundResponse, RequestError> {
        let realm = if self.config.preemptive {
            None
        } else {
            let first = self.send(exchange, &request).await?;
            if !self.is_challenge(&first.response) {
                return Ok(first.response);
            }
            self.challenge(first.response, &request)?
                .realm()
                .map(str::to_string)
        };

        let creds = self.credentials(realm.as_deref(), &request)?;
        let authed = self.authorized(&request, basic::encode(creds.username(), creds.password()));
        self.respond(exchange);
        let out = self.send(exchange, &authed).await?;
        self.finish(out.response, &authed, &creds, realm.as_deref())
    }

    async fn run_digest<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        request: OutboundRequest,
    ) -> Result<InboundResponse, RequestError> {
        let body = request.body().as_bytes();
        let method = request.method().as_str().to_string();
        let uri = self.digest_uri(&request)?;

        let first = match self.cache.digest_session(&self.origin, self.target) {
            Some(session) => {
                let creds = self.credentials(Some(session.challenge().realm()), &request)?;
                let header = session
                    .authorization(&method, &uri, &creds, body.as_deref())
                    .map_err(|e| e.or_request(&request))?;
                let authed = self.authorized(&request, header);
                self.respond(exchange);
                let out = self.send(exchange, &authed).await?;
                if !self.is_challenge(&out.response) {
                    self.transition(AuthState::Authenticated);
                    return Ok(out.response);
                }
                debug!(
                    origin = %self.origin,
                    nc = session.nonce_count(),
                    "cached digest nonce refused, starting a fresh challenge"
                );
                self.cache.invalidate_digest(&self.origin, self.target);
                out
            }
            None => {
                let out = self.send(exchange, &request).await?;
                if !self.is_challenge(&out.response) {
                    return Ok(out.response);
                }
                out
            }
        };

        let AuthChallenge::Digest(challenge) = self.challenge(first.response, &request)? else {
            return Err(RequestError::new(
                NetError::InvalidAuthChallenge,
                "expected a Digest challenge",
            )
            .or_request(&request));
        };
        let realm = challenge.realm().to_string();
        let creds = self.credentials(Some(&realm), &request)?;
        let session = Arc::new(DigestSession::new(challenge));
        let header = session
            .authorization(&method, &uri, &creds, body.as_deref())
            .map_err(|e| e.or_request(&request))?;
        let authed = self.authorized(&request, header);
        self.respond(exchange);
        let out = self.send(exchange, &authed).await?;
        let response = self.finish(out.response, &authed, &creds, Some(&realm))?;
        self.cache.store_digest(&self.origin, self.target, session);
        Ok(response)
    }

    async fn run_ntlm<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        request: OutboundRequest,
    ) -> Result<InboundResponse, RequestError> {
        let first = self.send(exchange, &request).await?;
        if !self.is_challenge(&first.response) {
            if first.session.is_ntlm_authenticated() {
                self.transition(AuthState::Authenticated);
            }
            return Ok(first.response);
        }
        if !matches!(
            self.challenge(first.response, &request)?,
            AuthChallenge::Ntlm { token: None }
        ) {
            return Err(RequestError::new(
                NetError::InvalidAuthChallenge,
                "NTLM handshake must start from a bare challenge",
            )
            .or_request(&request));
        }

        let creds = self.credentials(None, &request)?;
        let (domain, _) = creds.ntlm_identity();
        let workstation = creds.workstation().unwrap_or_default();
        let type1 = self.authorized(&request, ntlm::negotiate_token(&creds));

        let mut session = first.session;
        let mut restarted = false;
        loop {
            let mut lease = session.lease_ntlm().await;
            lease.begin(domain, workstation);
            self.respond(exchange);
            let second = self.send(exchange, &type1).await?;

            // Type 1 went out on a fresh connection; the handshake lives there.
            if second.connection_id != session.connection_id() {
                lease.advance(NtlmPhase::Failed);
                drop(lease);
                session = Arc::clone(&second.session);
                lease = session.lease_ntlm().await;
                lease.begin(domain, workstation);
            }

            if !self.is_challenge(&second.response) {
                lease.advance(NtlmPhase::Authenticated);
                self.transition(AuthState::Authenticated);
                return Ok(second.response);
            }

            let token = match find_challenge(second.response.headers(), self.target, AuthScheme::Ntlm) {
                Ok(AuthChallenge::Ntlm { token: Some(token) }) => token,
                Ok(_) => {
                    lease.advance(NtlmPhase::Failed);
                    return Err(RequestError::new(
                        NetError::InvalidAuthChallenge,
                        "NTLM negotiate answered without a type 2 message",
                    )
                    .with_response(second.response)
                    .or_request(&type1));
                }
                Err(e) => {
                    lease.advance(NtlmPhase::Failed);
                    return Err(e.with_response(second.response).or_request(&type1));
                }
            };
            let header = match ntlm::authenticate_token(&token, &creds) {
                Ok(header) => header,
                Err(e) => {
                    lease.advance(NtlmPhase::Failed);
                    return Err(e.with_response(second.response).or_request(&type1));
                }
            };

            let type3 = self.authorized(&request, header);
            lease.advance(NtlmPhase::AuthenticateSent);
            let third = self.send(exchange, &type3).await?;

            if third.connection_id != second.connection_id && self.is_challenge(&third.response) {
                lease.advance(NtlmPhase::Failed);
                drop(lease);
                if restarted {
                    return Err(RequestError::new(
                        NetError::UnableToReuseConnectionForProxyAuth,
                        format!(
                            "connection to {} closed during the NTLM handshake twice",
                            self.origin
                        ),
                    )
                    .with_response(third.response)
                    .or_request(&type3));
                }
                warn!(
                    origin = %self.origin,
                    conn = second.connection_id,
                    "connection closed mid NTLM handshake, restarting from type 1"
                );
                restarted = true;
                session = third.session;
                continue;
            }

            if self.is_challenge(&third.response) {
                lease.advance(NtlmPhase::Failed);
                return Err(self.rejected(third.response, &type3));
            }
            lease.advance(NtlmPhase::Authenticated);
            self.transition(AuthState::Authenticated);
            self.cache.remember(&self.origin, AuthScheme::Ntlm, None, &creds);
            return Ok(third.response);
        }
    }

    async fn send<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        request: &OutboundRequest,
    ) -> Result<ExchangeOutcome, RequestError> {
        self.requests_sent += 1;
        exchange.exchange(request).await
    }

    fn respond<E: Exchange + ?Sized>(&mut self, exchange: &mut E) {
        self.transition(AuthState::Responding);
        exchange.authenticating();
    }

    fn transition(&mut self, next: AuthState) {
        if self.state != next {
            debug!(target = ?self.target, from = ?self.state, to = ?next, "auth state");
            self.state = next;
        }
    }

    fn is_challenge(&self, response: &InboundResponse) -> bool {
        response.status() == self.target.challenge_status()
    }

    fn challenge(
        &mut self,
        response: InboundResponse,
        request: &OutboundRequest,
    ) -> Result<AuthChallenge, RequestError> {
        match find_challenge(response.headers(), self.target, self.config.scheme) {
            Ok(challenge) => {
                self.transition(AuthState::Challenged);
                Ok(challenge)
            }
            Err(e) => Err(e.with_response(response).or_request(request)),
        }
    }

    fn credentials(
        &self,
        realm: Option<&str>,
        request: &OutboundRequest,
    ) -> Result<Credentials, RequestError> {
        self.config
            .credentials
            .clone()
            .or_else(|| self.source.credentials(self.config.scheme, realm, &self.origin))
            .ok_or_else(|| {
                RequestError::new(
                    NetError::MissingAuthCredentials,
                    format!("no {} credentials for {}", self.config.scheme, self.origin),
                )
                .or_request(request)
            })
    }

    fn authorized(&self, request: &OutboundRequest, value: String) -> OutboundRequest {
        let mut authed = request.clone();
        authed
            .headers_mut()
            .set(self.target.authorization_header(), value);
        authed
    }

    fn finish(
        &mut self,
        response: InboundResponse,
        request: &OutboundRequest,
        creds: &Credentials,
        realm: Option<&str>,
    ) -> Result<InboundResponse, RequestError> {
        if self.is_challenge(&response) {
            return Err(self.rejected(response, request));
        }
        self.transition(AuthState::Authenticated);
        self.cache.remember(&self.origin, self.config.scheme, realm, creds);
        Ok(response)
    }

    fn rejected(&self, response: InboundResponse, request: &OutboundRequest) -> RequestError {
        RequestError::new(
            NetError::InvalidAuthCredentials,
            format!(
                "{} credentials rejected by {} ({})",
                self.config.scheme,
                self.origin,
                response.status()
            ),
        )
        .with_response(response)
        .or_request(request)
    }

    fn digest_uri(&self, request: &OutboundRequest) -> Result<String, RequestError> {
        Ok(match self.form {
            TargetForm::Origin => request.request_target(self.encode_query),
            TargetForm::Absolute => request.absolute_target(self.encode_query),
            TargetForm::Authority => request.origin()?.authority(),
        })
    }
}
