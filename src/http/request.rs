//! The outbound request and its frozen, wire-ready form.

use crate::base::neterror::{NetError, RequestError};
use crate::http::framing::{self, FramingDecision, StreamingPolicy};
use crate::http::headers::HeaderSet;
use crate::http::query::QueryParams;
use crate::http::requestbody::BodyDescriptor;
use http::Method;
use std::fmt;
use url::Url;

/// Scheme, host and port of a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn from_url(url: &Url) -> Result<Self, RequestError> {
        let host = url
            .host_str()
            .ok_or_else(|| RequestError::new(NetError::InvalidUrl, format!("{} has no host", url)))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            RequestError::new(NetError::InvalidUrl, format!("{} has no port", url))
        })?;
        Ok(Self {
            secure: url.scheme() == "https",
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }

    /// `host:port` with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn is_default_port(&self) -> bool {
        (self.secure && self.port == 443) || (!self.secure && self.port == 80)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

/// A request to forward.
///
/// Header pairs keep their casing and order; query pairs keep order and
/// repeats. The URI never carries a query: it lives in [`QueryParams`] so
/// encoding can be decided at send time.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    uri: Url,
    headers: HeaderSet,
    query: QueryParams,
    body: BodyDescriptor,
}

impl OutboundRequest {
    /// Parse `uri`, moving any query string into the query pairs.
    pub fn new(method: Method, uri: &str) -> Result<Self, RequestError> {
        let url = Url::parse(uri).map_err(|e| {
            RequestError::new(NetError::InvalidUrl, format!("{}: {}", uri, e)).with_source(e)
        })?;
        Self::from_url(method, url)
    }

    pub fn from_url(method: Method, mut uri: Url) -> Result<Self, RequestError> {
        match uri.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RequestError::new(
                    NetError::UnknownUrlScheme,
                    format!("unsupported scheme {}", other),
                ))
            }
        }
        if uri.host_str().is_none() {
            return Err(RequestError::new(
                NetError::InvalidUrl,
                format!("{} has no host", uri),
            ));
        }
        let query = uri.query().map(QueryParams::parse).unwrap_or_default();
        uri.set_query(None);
        uri.set_fragment(None);
        Ok(Self {
            method,
            uri,
            headers: HeaderSet::new(),
            query,
            body: BodyDescriptor::Empty,
        })
    }

    pub fn get(uri: &str) -> Result<Self, RequestError> {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Result<Self, RequestError> {
        Self::new(Method::POST, uri)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.append(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<BodyDescriptor>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query_params(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn body(&self) -> &BodyDescriptor {
        &self.body
    }

    pub fn take_body(&mut self) -> BodyDescriptor {
        std::mem::take(&mut self.body)
    }

    pub(crate) fn set_body(&mut self, body: BodyDescriptor) {
        self.body = body;
    }

    pub fn origin(&self) -> Result<Origin, RequestError> {
        Origin::from_url(&self.uri)
    }

    pub fn is_secure(&self) -> bool {
        self.uri.scheme() == "https"
    }

    /// Value for the `Host` header: the port is omitted when it is the
    /// scheme default.
    pub fn host_header(&self) -> String {
        let host = self.uri.host_str().unwrap_or_default();
        match self.uri.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Path plus query, as sent to an origin server.
    pub fn request_target(&self, encode_query: bool) -> String {
        let mut target = self.uri.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if !self.query.is_empty() {
            target.push('?');
            target.push_str(&self.query.render(encode_query));
        }
        target
    }

    /// Full URL with the query, as sent to a forward proxy.
    pub fn absolute_target(&self, encode_query: bool) -> String {
        let mut url = self.uri.clone();
        url.set_query(None);
        let mut target = url.to_string();
        if !self.query.is_empty() {
            target.push('?');
            target.push_str(&self.query.render(encode_query));
        }
        target
    }

    /// The URI including the current query, for resolving relative
    /// redirect locations.
    pub fn full_url(&self) -> Url {
        let mut url = self.uri.clone();
        if !self.query.is_empty() {
            url.set_query(Some(&self.query.encode()));
        }
        url
    }

    /// Resolve framing against the current body and lock the request for
    /// sending.
    pub fn freeze(self, policy: StreamingPolicy, encode_query: bool) -> FrozenRequest {
        let framing = framing::resolve(&self.body, policy, &self.method);
        FrozenRequest {
            request: self,
            framing,
            encode_query,
        }
    }
}

/// A request whose framing has been decided.
///
/// Only [`OutboundRequest::freeze`] builds one, so the framing always
/// matches the body it carries. A stream that yields a different length
/// than declared is caught by the wire writer as `FramingConflict`.
#[derive(Debug, Clone)]
pub struct FrozenRequest {
    request: OutboundRequest,
    framing: FramingDecision,
    encode_query: bool,
}

impl FrozenRequest {
    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    pub fn into_request(self) -> OutboundRequest {
        self.request
    }

    pub fn framing(&self) -> FramingDecision {
        self.framing
    }

    pub fn encode_query(&self) -> bool {
        self.encode_query
    }
}
