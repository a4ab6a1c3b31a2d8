//! HTTP Client with builder pattern.
//!
//! One [`Client`] owns the collaborators every send uses: the transport,
//! the TLS upgrader, the credential source, the auth cache and the
//! capabilities picked at build time. Cloning is cheap.
//!
//! # Example
//!
//! ```rust,ignore
//! use relaynet::{Client, Options, AuthConfig};
//!
//! let client = Client::builder()
//!     .proxy(ProxyConfig::new("http://proxy.corp:3128")?)
//!     .build()?;
//!
//! let resp = client
//!     .post("https://api.example.com/upload")
//!     .header("X-Trace", "abc")
//!     .body("payload")
//!     .auth(AuthConfig::digest("user", "pass"))
//!     .send()
//!     .await?;
//! ```

use crate::base::capabilities::Capabilities;
use crate::base::loadstate::LoadStateReporter;
use crate::base::neterror::{NetError, RequestError};
use crate::http::auth::{AuthConfig, CredentialSource, NoCredentials};
use crate::http::framing::StreamingPolicy;
use crate::http::request::OutboundRequest;
use crate::http::requestbody::BodyDescriptor;
use crate::http::response::InboundResponse;
use crate::http::transaction::Transaction;
use crate::options::Options;
use crate::socket::authcache::AuthCache;
use crate::socket::proxy::ProxyConfig;
use crate::socket::tls::{BoringTlsUpgrader, TlsConfig, TlsUpgrader};
use crate::socket::transport::{TcpTransport, Transport};
use futures::future::{AbortHandle, Abortable, Aborted};
use http::Method;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every request of a client.
pub struct ClientContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tls: Arc<dyn TlsUpgrader>,
    pub(crate) credentials: Arc<dyn CredentialSource>,
    pub(crate) cache: AuthCache,
    pub(crate) capabilities: Capabilities,
    pub(crate) proxy: Option<ProxyConfig>,
}

impl ClientContext {
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn auth_cache(&self) -> &AuthCache {
        &self.cache
    }

    /// Proxy used when a request's options name none.
    pub fn default_proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }
}

/// HTTP Client for making requests.
///
/// Use [`Client::builder()`] to configure and create a client.
#[derive(Clone)]
pub struct Client {
    context: Arc<ClientContext>,
    options: Options,
}

impl Client {
    /// Create a new client with default settings.
    pub fn new() -> Result<Self, RequestError> {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    /// Options used by [`RequestBuilder`]s from this client.
    pub fn default_options(&self) -> &Options {
        &self.options
    }

    /// Forward `request`, following the given options.
    pub async fn send(
        &self,
        request: OutboundRequest,
        options: Options,
    ) -> Result<InboundResponse, RequestError> {
        Transaction::new(Arc::clone(&self.context), options)
            .start(request)
            .await
    }

    /// Like [`send`](Self::send), but progress is published to `reporter`.
    pub async fn send_observed(
        &self,
        request: OutboundRequest,
        options: Options,
        reporter: LoadStateReporter,
    ) -> Result<InboundResponse, RequestError> {
        Transaction::new(Arc::clone(&self.context), options)
            .with_load_state(reporter)
            .start(request)
            .await
    }

    /// Send with a handle that cancels the operation.
    ///
    /// Aborting drops the in-flight transaction, closing any connection or
    /// tunnel it had opened. The future then resolves to `Aborted`.
    pub fn send_abortable(
        &self,
        request: OutboundRequest,
        options: Options,
    ) -> (
        impl Future<Output = Result<InboundResponse, RequestError>> + Send + 'static,
        AbortHandle,
    ) {
        let (handle, registration) = AbortHandle::new_pair();
        let transaction = Transaction::new(Arc::clone(&self.context), options);
        let fut = Abortable::new(transaction.start(request), registration);
        let fut = async move {
            match fut.await {
                Ok(result) => result,
                Err(Aborted) => Err(RequestError::new(
                    NetError::Aborted,
                    "request aborted by caller",
                )),
            }
        };
        (fut, handle)
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: OutboundRequest::new(method, url.as_ref()),
            options: self.options.clone(),
        }
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    tls: Option<Arc<dyn TlsUpgrader>>,
    tls_config: Option<TlsConfig>,
    credentials: Option<Arc<dyn CredentialSource>>,
    cache: Option<AuthCache>,
    capabilities: Option<Capabilities>,
    proxy: Option<ProxyConfig>,
    options: Option<Options>,
    connect_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Replace the TCP transport, e.g. with an in-memory one in tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the BoringSSL upgrader.
    pub fn tls_upgrader(mut self, tls: Arc<dyn TlsUpgrader>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Settings for the default BoringSSL upgrader.
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Asked for credentials when an [`AuthConfig`] carries none.
    pub fn credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Share an auth cache between clients.
    pub fn auth_cache(mut self, cache: AuthCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Default proxy. A proxy in a request's [`Options`] wins over it.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Use `HTTPS_PROXY`/`HTTP_PROXY` and `NO_PROXY` when set.
    pub fn proxy_from_env(mut self) -> Self {
        self.proxy = ProxyConfig::from_env();
        self
    }

    /// Options for requests built with [`Client::get`] and friends.
    pub fn default_options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let options = self.options.take().unwrap_or_default();
        self.options = Some(options.with_timeout(Some(timeout)));
        self
    }

    /// Per-address TCP connect timeout for the default transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, RequestError> {
        let tls: Arc<dyn TlsUpgrader> = match self.tls {
            Some(tls) => tls,
            None => Arc::new(BoringTlsUpgrader::new(self.tls_config.unwrap_or_default())?),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut tcp = TcpTransport::new(Arc::clone(&tls));
                if let Some(timeout) = self.connect_timeout {
                    tcp = tcp.with_connect_timeout(timeout);
                }
                Arc::new(tcp)
            }
        };

        Ok(Client {
            context: Arc::new(ClientContext {
                transport,
                tls,
                credentials: self.credentials.unwrap_or_else(|| Arc::new(NoCredentials)),
                cache: self.cache.unwrap_or_default(),
                capabilities: self.capabilities.unwrap_or_default(),
                proxy: self.proxy,
            }),
            options: self.options.unwrap_or_default(),
        })
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    request: Result<OutboundRequest, RequestError>,
    options: Options,
}

impl RequestBuilder {
    /// Add a header. Casing and order are kept on the wire.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.map(|r| r.with_header(key, value));
        self
    }

    /// Append a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.map(|r| r.with_query(key, value));
        self
    }

    /// Set request body.
    pub fn body(mut self, body: impl Into<BodyDescriptor>) -> Self {
        self.request = self.request.map(|r| r.with_body(body));
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        self.request = self.request.and_then(|r| {
            let bytes = serde_json::to_vec(json).map_err(|e| {
                RequestError::new(NetError::InvalidArgument, format!("serialize JSON body: {}", e))
                    .with_source(e)
            })?;
            Ok(r.with_header("Content-Type", "application/json").with_body(bytes))
        });
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.options.auth = Some(auth);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.options.proxy = Some(proxy);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.options.follow_redirects = follow;
        self
    }

    pub fn streaming_policy(mut self, policy: StreamingPolicy) -> Self {
        self.options.streaming_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Replace all options for this request.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Send the request.
    pub async fn send(self) -> Result<InboundResponse, RequestError> {
        let request = self.request?;
        self.client.send(request, self.options).await
    }
}
