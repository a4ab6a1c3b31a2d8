//! CONNECT tunnels through a forward proxy.
//!
//! Mirrors Chromium's `HttpProxyClientSocket`: write `CONNECT host:port`,
//! answer 407s with the proxy's auth config, and once the proxy says 2xx
//! hand the raw socket to TLS. The certificate is verified against the
//! target host, never the proxy.

use crate::base::loadstate::{LoadState, LoadStateReporter};
use crate::base::neterror::{ErrorCategory, NetError, RequestError};
use crate::http::auth::{AuthNegotiator, AuthTarget, CredentialSource, Exchange, ExchangeOutcome};
use crate::http::framing::StreamingPolicy;
use crate::http::request::{OutboundRequest, Origin};
use crate::http::wire::{self, TargetForm};
use crate::socket::authcache::AuthCache;
use crate::socket::proxy::ProxyConfig;
use crate::socket::tls::TlsUpgrader;
use crate::socket::transport::{Connection, Transport};
use async_trait::async_trait;
use http::{Method, StatusCode};
use tracing::{debug, warn};

/// Tunnel progress on one proxy connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    ConnectSent,
    /// The proxy answered 407.
    ProxyChallenged,
    ConnectEstablished,
    TlsHandshaking,
    Tunneled,
    Failed,
}

/// Builds TLS connections to a target through a proxy.
pub struct TunnelEstablisher<'a> {
    transport: &'a dyn Transport,
    tls: &'a dyn TlsUpgrader,
    proxy: &'a ProxyConfig,
    credentials: &'a dyn CredentialSource,
    cache: &'a AuthCache,
    load_state: Option<LoadStateReporter>,
    state: TunnelState,
}

impl<'a> TunnelEstablisher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        tls: &'a dyn TlsUpgrader,
        proxy: &'a ProxyConfig,
        credentials: &'a dyn CredentialSource,
        cache: &'a AuthCache,
    ) -> Self {
        Self {
            transport,
            tls,
            proxy,
            credentials,
            cache,
            load_state: None,
            state: TunnelState::Idle,
        }
    }

    pub fn with_load_state(mut self, reporter: LoadStateReporter) -> Self {
        self.load_state = Some(reporter);
        self
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Open a TLS connection to `target` through the proxy.
    pub async fn establish(&mut self, target: &Origin) -> Result<Connection, RequestError> {
        match self.connect(target).await {
            Ok(conn) => {
                self.transition(TunnelState::Tunneled);
                Ok(conn)
            }
            Err(e) => {
                self.transition(TunnelState::Failed);
                Err(e)
            }
        }
    }

    async fn connect(&mut self, target: &Origin) -> Result<Connection, RequestError> {
        self.report(LoadState::EstablishingProxyTunnel);
        let (transport, proxy, credentials, cache) =
            (self.transport, self.proxy, self.credentials, self.cache);
        let conn = open_proxy(transport, proxy).await?;

        let request = connect_request(target)?;
        let mut exchange = ConnectExchange {
            transport,
            proxy,
            conn: Some(conn),
            state: &mut self.state,
            load_state: self.load_state.clone(),
        };

        let response = match proxy.auth() {
            Some(auth) => {
                AuthNegotiator::new(AuthTarget::Proxy, auth.clone(), proxy.origin(), credentials, cache)
                    .with_target_form(TargetForm::Authority)
                    .run(&mut exchange, request.clone())
                    .await?
            }
            None => exchange.exchange(&request).await?.response,
        };
        let conn = exchange.conn.take();

        if response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(RequestError::new(
                NetError::MissingAuthCredentials,
                format!("proxy {} requires authentication", proxy.origin()),
            )
            .with_response(response)
            .with_request(request));
        }
        if !response.status().is_success() {
            return Err(RequestError::new(
                NetError::TunnelConnectionFailed,
                format!(
                    "proxy {} refused CONNECT {}: {}",
                    proxy.origin(),
                    target.authority(),
                    response.status()
                ),
            )
            .with_response(response)
            .with_request(request));
        }
        let conn = conn.ok_or_else(|| {
            RequestError::new(NetError::ConnectionClosed, "proxy closed the tunnel connection")
        })?;
        self.transition(TunnelState::ConnectEstablished);

        let socket = conn.into_socket()?;
        self.transition(TunnelState::TlsHandshaking);
        self.report(LoadState::SslHandshake);
        let socket = self.tls.upgrade(socket, &target.host).await.map_err(|e| {
            warn!(target = %target, error = %e, "TLS through tunnel failed");
            let code = if e.category() == ErrorCategory::TlsFailed {
                e.code()
            } else {
                NetError::SslProtocolError
            };
            RequestError::new(
                code,
                format!("TLS to {} through proxy {}: {}", target.authority(), proxy.origin(), e.message()),
            )
            .with_source(e)
        })?;
        Ok(Connection::new(socket, target.host.clone(), target.port, true))
    }

    fn transition(&mut self, next: TunnelState) {
        if self.state != next {
            debug!(proxy = %self.proxy.origin(), from = ?self.state, to = ?next, "tunnel state");
            self.state = next;
        }
    }

    fn report(&self, state: LoadState) {
        if let Some(r) = &self.load_state {
            r.set(state);
        }
    }
}

async fn open_proxy(transport: &dyn Transport, proxy: &ProxyConfig) -> Result<Connection, RequestError> {
    transport
        .open(proxy.host(), proxy.port(), false)
        .await
        .map_err(|e| {
            RequestError::new(
                NetError::ProxyConnectionFailed,
                format!("proxy {} unreachable: {}", proxy.origin(), e.message()),
            )
            .with_source(e)
        })
}

fn connect_request(target: &Origin) -> Result<OutboundRequest, RequestError> {
    Ok(
        OutboundRequest::new(Method::CONNECT, &format!("https://{}/", target.authority()))?
            .with_header("Proxy-Connection", "keep-alive"),
    )
}

/// Sends CONNECT requests over the plain proxy connection, reopening it
/// when the proxy closed it after a challenge.
struct ConnectExchange<'a, 's> {
    transport: &'a dyn Transport,
    proxy: &'a ProxyConfig,
    conn: Option<Connection>,
    state: &'s mut TunnelState,
    load_state: Option<LoadStateReporter>,
}

#[async_trait]
impl Exchange for ConnectExchange<'_, '_> {
    async fn exchange(&mut self, request: &OutboundRequest) -> Result<ExchangeOutcome, RequestError> {
        let mut conn = match self.conn.take() {
            Some(conn) if conn.is_reusable() => conn,
            _ => {
                debug!(proxy = %self.proxy.origin(), "reopening proxy connection");
                open_proxy(self.transport, self.proxy).await?
            }
        };

        let frozen = request.clone().freeze(StreamingPolicy::Auto, true);
        wire::write_request(&mut conn, &frozen, TargetForm::Authority).await?;
        *self.state = TunnelState::ConnectSent;
        let raw = wire::read_response(&mut conn, &Method::CONNECT).await?;
        if raw.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            *self.state = TunnelState::ProxyChallenged;
        }

        let outcome = ExchangeOutcome {
            response: raw.into_response(request.uri().clone()),
            connection_id: conn.id(),
            session: conn.auth_session(),
        };
        self.conn = Some(conn);
        Ok(outcome)
    }

    fn authenticating(&mut self) {
        if let Some(r) = &self.load_state {
            r.set(LoadState::Authenticating);
        }
    }
}
