//! One forwarding operation, from the first byte to the final response.
//!
//! Plays the part of Chromium's `URLRequestHttpJob` driving an
//! `HttpNetworkTransaction`: every hop is normalized and framed afresh,
//! routed (direct, CONNECT tunnel or absolute-form through a proxy), sent,
//! authenticated when challenged, and followed when it redirects. All hops
//! and retries share one deadline.
//!
//! There is no pool: a connection lives for one operation and is reused by
//! its auth resends and same-route redirects while the peer keeps it open.

use crate::base::deadline::Deadline;
use crate::base::loadstate::{LoadState, LoadStateReporter};
use crate::base::neterror::{NetError, RequestError};
use crate::client::ClientContext;
use crate::http::auth::{
    AuthConfig, AuthNegotiator, AuthSession, AuthTarget, Exchange, ExchangeOutcome,
};
use crate::http::framing::StreamingPolicy;
use crate::http::normalizer::{normalize, NormalizeOverrides};
use crate::http::redirect::RedirectFollower;
use crate::http::request::{OutboundRequest, Origin};
use crate::http::response::InboundResponse;
use crate::http::wire::{self, RawResponse, TargetForm};
use crate::options::Options;
use crate::socket::proxy::ProxyConfig;
use crate::socket::transport::Connection;
use crate::socket::tunnel::TunnelEstablisher;
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// Where a connection leads. A kept connection is only reused for a
/// request with the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RouteKey {
    Direct(Origin),
    Tunnel { proxy: Origin, target: Origin },
    Forward(Origin),
}

enum Route<'p> {
    Direct(Origin),
    /// `https` target through a proxy.
    Tunnel(&'p ProxyConfig, Origin),
    /// `http` target through a proxy, sent in absolute form.
    Forward(&'p ProxyConfig),
}

impl Route<'_> {
    fn key(&self) -> RouteKey {
        match self {
            Route::Direct(origin) => RouteKey::Direct(origin.clone()),
            Route::Tunnel(proxy, target) => RouteKey::Tunnel {
                proxy: proxy.origin(),
                target: target.clone(),
            },
            Route::Forward(proxy) => RouteKey::Forward(proxy.origin()),
        }
    }

    fn form(&self) -> TargetForm {
        match self {
            Route::Forward(_) => TargetForm::Absolute,
            _ => TargetForm::Origin,
        }
    }
}

/// The proxy for `url`: the per-request one if set, else the client's,
/// unless its exclusion list matches.
fn select_proxy<'p>(
    options: &'p Options,
    context: &'p ClientContext,
    url: &Url,
) -> Option<&'p ProxyConfig> {
    let proxy = options.proxy.as_ref().or(context.proxy.as_ref())?;
    if proxy.should_bypass(url) {
        trace!(url = %url, proxy = %proxy.origin(), "proxy bypassed");
        return None;
    }
    Some(proxy)
}

/// Errors after which a kept-alive connection is presumed closed by the
/// peer between requests.
fn is_stale_connection(err: &RequestError) -> bool {
    matches!(
        err.code(),
        NetError::ConnectionClosed
            | NetError::ConnectionReset
            | NetError::ConnectionAborted
            | NetError::EmptyResponse
    )
}

pub struct Transaction {
    context: Arc<ClientContext>,
    options: Options,
    load_state: LoadStateReporter,
    conn: Option<(RouteKey, Connection)>,
}

impl Transaction {
    pub fn new(context: Arc<ClientContext>, options: Options) -> Self {
        Self {
            context,
            options,
            load_state: LoadStateReporter::new(),
            conn: None,
        }
    }

    /// Publish progress to `reporter` instead of a private channel.
    pub fn with_load_state(mut self, reporter: LoadStateReporter) -> Self {
        self.load_state = reporter;
        self
    }

    /// Get the current load state (for progress reporting).
    pub fn load_state(&self) -> LoadState {
        self.load_state.current()
    }

    /// Run the operation to its final response.
    pub async fn start(mut self, request: OutboundRequest) -> Result<InboundResponse, RequestError> {
        let deadline = Deadline::after(self.options.timeout);
        debug!(
            method = %request.method(),
            url = %request.uri(),
            timeout_ms = ?self.options.timeout.map(|t| t.as_millis()),
            "transaction start"
        );
        let original = request.clone();
        let result = deadline
            .run(self.run(request))
            .await
            .map_err(|e| e.or_request(&original));
        self.load_state.set(LoadState::Idle);
        if let Some((_, conn)) = self.conn.take() {
            trace!(conn = conn.id(), "transaction done, closing connection");
        }
        match &result {
            Ok(response) => debug!(status = response.status().as_u16(), "transaction complete"),
            Err(e) => debug!(error = %e, "transaction failed"),
        }
        result
    }

    async fn run(&mut self, request: OutboundRequest) -> Result<InboundResponse, RequestError> {
        self.check_capabilities(&request)?;
        let mut request = self.prepare_body(request).await?;
        let mut follower = RedirectFollower::new(self.options.max_redirects);
        // Configured credentials are only offered to the first origin.
        let auth_origin = request.origin()?;

        loop {
            let hop = normalized(request);
            let with_auth = hop.origin()? == auth_origin;
            let response = self.send_hop(&hop, with_auth).await?;
            if !self.options.follow_redirects {
                return Ok(response);
            }
            match follower.follow(&hop, &response)? {
                None => return Ok(response),
                Some(next) => {
                    self.load_state.set(LoadState::Redirecting);
                    debug!(hop = follower.hops(), to = %next.uri(), "redirect");
                    request = next;
                }
            }
        }
    }

    fn check_capabilities(&self, request: &OutboundRequest) -> Result<(), RequestError> {
        let proxy = self.options.proxy.as_ref().or(self.context.proxy.as_ref());
        let wanted = [
            self.options.auth.as_ref(),
            proxy.and_then(ProxyConfig::auth),
        ];
        for auth in wanted.into_iter().flatten() {
            if !self.context.capabilities.supports(auth.scheme) {
                return Err(RequestError::new(
                    NetError::UnsupportedAuthScheme,
                    format!("{} authentication is disabled for this client", auth.scheme),
                )
                .with_request(request.clone()));
            }
        }
        Ok(())
    }

    /// Buffer a live stream when the body may have to go out again, or when
    /// this client does not stream bodies.
    async fn prepare_body(&self, mut request: OutboundRequest) -> Result<OutboundRequest, RequestError> {
        if request.body().is_repeatable() {
            return Ok(request);
        }
        let proxy = self.options.proxy.as_ref().or(self.context.proxy.as_ref());
        let may_resend = self.options.auth.is_some() || proxy.is_some_and(|p| p.auth().is_some());
        if may_resend || !self.context.capabilities.streaming_bodies {
            trace!(may_resend, "buffering streamed body");
            let body = request.take_body().into_repeatable().await?;
            request.set_body(body);
        }
        Ok(request)
    }

    async fn send_hop(
        &mut self,
        request: &OutboundRequest,
        with_auth: bool,
    ) -> Result<InboundResponse, RequestError> {
        let origin = request.origin()?;
        let Self {
            context,
            options,
            load_state,
            conn,
        } = self;
        let context: &ClientContext = &**context;

        let route = match select_proxy(options, context, request.uri()) {
            None => Route::Direct(origin),
            Some(proxy) if origin.secure => Route::Tunnel(proxy, origin),
            Some(proxy) => Route::Forward(proxy),
        };
        let form = route.form();
        let auth = options.auth.as_ref().filter(|_| with_auth);
        let mut link = Link {
            context,
            route: &route,
            conn,
            load_state,
            policy: options.streaming_policy,
            encode_query: options.encode_query,
            last: None,
        };

        match &route {
            Route::Forward(proxy) => {
                let mut exchange = ProxyAuthorized {
                    link: &mut link,
                    proxy: *proxy,
                };
                authenticate(&mut exchange, request, auth, context, form, options.encode_query).await
            }
            _ => authenticate(&mut link, request, auth, context, form, options.encode_query).await,
        }
    }
}

/// Caller headers and query in wire-ready form. Runs for every hop, so a
/// rebuilt redirect request is normalized and framed again.
fn normalized(request: OutboundRequest) -> OutboundRequest {
    let (headers, query) = normalize(
        request.headers().iter(),
        request.query(),
        &NormalizeOverrides::default(),
    );
    request.with_headers(headers).with_query_params(query)
}

/// Send with origin-server auth when configured.
async fn authenticate<E: Exchange + ?Sized>(
    exchange: &mut E,
    request: &OutboundRequest,
    auth: Option<&AuthConfig>,
    context: &ClientContext,
    form: TargetForm,
    encode_query: bool,
) -> Result<InboundResponse, RequestError> {
    match auth {
        Some(auth) => {
            AuthNegotiator::new(
                AuthTarget::Server,
                auth.clone(),
                request.origin()?,
                context.credentials.as_ref(),
                &context.cache,
            )
            .with_target_form(form)
            .with_encode_query(encode_query)
            .run(exchange, request.clone())
            .await
        }
        None => Ok(exchange.exchange(request).await?.response),
    }
}

/// Sends requests over the transaction's connection for one route.
struct Link<'t> {
    context: &'t ClientContext,
    route: &'t Route<'t>,
    conn: &'t mut Option<(RouteKey, Connection)>,
    load_state: &'t LoadStateReporter,
    policy: StreamingPolicy,
    encode_query: bool,
    /// Connection and auth session of the last response.
    last: Option<(u64, Arc<AuthSession>)>,
}

impl Link<'_> {
    /// The kept connection when it fits this route, else a new one.
    async fn connection(&mut self) -> Result<(Connection, bool), RequestError> {
        let key = self.route.key();
        match self.conn.take() {
            Some((kept, conn)) if kept == key && conn.is_reusable() => {
                trace!(conn = conn.id(), "reusing connection");
                return Ok((conn, true));
            }
            Some((_, conn)) => trace!(conn = conn.id(), "dropping connection"),
            None => {}
        }

        self.load_state.set(LoadState::Connecting);
        let context = self.context;
        let conn = match self.route {
            Route::Direct(origin) => {
                context
                    .transport
                    .open(&origin.host, origin.port, origin.secure)
                    .await?
            }
            Route::Tunnel(proxy, target) => {
                TunnelEstablisher::new(
                    context.transport.as_ref(),
                    context.tls.as_ref(),
                    proxy,
                    context.credentials.as_ref(),
                    &context.cache,
                )
                .with_load_state(self.load_state.clone())
                .establish(target)
                .await?
            }
            Route::Forward(proxy) => context
                .transport
                .open(proxy.host(), proxy.port(), false)
                .await
                .map_err(|e| {
                    RequestError::new(
                        NetError::ProxyConnectionFailed,
                        format!("proxy {} unreachable: {}", proxy.origin(), e.message()),
                    )
                    .with_source(e)
                })?,
        };
        Ok((conn, false))
    }

    async fn write_and_read(
        &self,
        conn: &mut Connection,
        request: &OutboundRequest,
    ) -> Result<RawResponse, RequestError> {
        let frozen = request.clone().freeze(self.policy, self.encode_query);
        trace!(conn = conn.id(), framing = ?frozen.framing(), "framing resolved");
        self.load_state.set(LoadState::SendingRequest);
        wire::write_request(conn, &frozen, self.route.form()).await?;
        self.load_state.set(LoadState::WaitingForResponse);
        wire::read_response(conn, request.method()).await
    }

    async fn round_trip(&mut self, request: &OutboundRequest) -> Result<ExchangeOutcome, RequestError> {
        let mut retried = false;
        loop {
            let (mut conn, reused) = self
                .connection()
                .await
                .map_err(|e| e.or_request(request))?;
            match self.write_and_read(&mut conn, request).await {
                Ok(raw) => {
                    let outcome = ExchangeOutcome {
                        response: raw.into_response(request.full_url()),
                        connection_id: conn.id(),
                        session: conn.auth_session(),
                    };
                    self.last = Some((outcome.connection_id, Arc::clone(&outcome.session)));
                    *self.conn = Some((self.route.key(), conn));
                    return Ok(outcome);
                }
                Err(e)
                    if reused
                        && !retried
                        && is_stale_connection(&e)
                        && request.body().is_repeatable() =>
                {
                    debug!(conn = conn.id(), error = %e, "kept connection failed, retrying on a new one");
                    retried = true;
                }
                Err(e) => return Err(e.or_request(request)),
            }
        }
    }
}

#[async_trait]
impl Exchange for Link<'_> {
    async fn exchange(&mut self, request: &OutboundRequest) -> Result<ExchangeOutcome, RequestError> {
        self.round_trip(request).await
    }

    fn authenticating(&mut self) {
        self.load_state.set(LoadState::Authenticating);
    }
}

/// Answers 407s from a forward proxy before the origin server sees the
/// request.
struct ProxyAuthorized<'l, 't> {
    link: &'l mut Link<'t>,
    proxy: &'t ProxyConfig,
}

#[async_trait]
impl Exchange for ProxyAuthorized<'_, '_> {
    async fn exchange(&mut self, request: &OutboundRequest) -> Result<ExchangeOutcome, RequestError> {
        let context = self.link.context;
        let response = match self.proxy.auth() {
            Some(auth) => {
                AuthNegotiator::new(
                    AuthTarget::Proxy,
                    auth.clone(),
                    self.proxy.origin(),
                    context.credentials.as_ref(),
                    &context.cache,
                )
                .with_target_form(TargetForm::Absolute)
                .with_encode_query(self.link.encode_query)
                .run(&mut *self.link, request.clone())
                .await?
            }
            None => self.link.exchange(request).await?.response,
        };
        if response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(RequestError::new(
                NetError::MissingAuthCredentials,
                format!("proxy {} requires authentication", self.proxy.origin()),
            )
            .with_response(response)
            .with_request(request.clone()));
        }
        let (connection_id, session) = self
            .link
            .last
            .clone()
            .ok_or_else(|| RequestError::new(NetError::ConnectionClosed, "no proxy connection"))?;
        Ok(ExchangeOutcome {
            response,
            connection_id,
            session,
        })
    }

    fn authenticating(&mut self) {
        self.link.authenticating();
    }
}
