//! Requests received from downstream clients.

use crate::base::capabilities::ClientCertResolver;
use crate::base::neterror::{NetError, RequestError};
use crate::http::requestbody::BodyDescriptor;
use http::Method;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

const MAX_HEADERS: usize = 128;

/// A request as it arrived, before any normalization.
///
/// Header pairs are kept exactly as received, casing and repeats included.
pub struct InboundRequest {
    method: Method,
    target: String,
    headers: Vec<(String, String)>,
    body: BodyDescriptor,
    client_addr: Option<SocketAddr>,
    cert_resolver: Option<ClientCertResolver>,
    client_cert: OnceCell<Option<Vec<u8>>>,
}

impl InboundRequest {
    /// `target` is the raw request-target, e.g. `/items?id=1&id=2`.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: BodyDescriptor::Empty,
            client_addr: None,
            cert_resolver: None,
            client_cert: OnceCell::new(),
        }
    }

    /// Parse a request head. Returns the request and the head length, or
    /// `None` when `buf` does not hold a complete head yet.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let len = match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => {
                return Err(RequestError::new(
                    NetError::InvalidArgument,
                    format!("malformed request head: {}", e),
                )
                .with_source(e))
            }
        };
        let method = req
            .method
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .ok_or_else(|| RequestError::new(NetError::InvalidArgument, "bad request method"))?;
        let mut inbound = Self::new(method, req.path.unwrap_or("/"));
        for header in req.headers.iter() {
            inbound.headers.push((
                header.name.to_string(),
                String::from_utf8_lossy(header.value).into_owned(),
            ));
        }
        Ok(Some((inbound, len)))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<BodyDescriptor>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Path part of the target.
    pub fn path(&self) -> &str {
        let target = self.target.split('?').next().unwrap_or("");
        if target.is_empty() {
            "/"
        } else {
            target
        }
    }

    /// Raw query string, without the `?`.
    pub fn raw_query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &BodyDescriptor {
        &self.body
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub(crate) fn set_cert_resolver(&mut self, resolver: Option<ClientCertResolver>) {
        self.cert_resolver = resolver;
    }

    /// DER certificate the client presented, looked up on first access.
    pub fn client_certificate(&self) -> Option<&[u8]> {
        self.client_cert
            .get_or_init(|| match (self.cert_resolver, self.client_addr) {
                (Some(resolve), Some(addr)) => resolve(addr),
                _ => None,
            })
            .as_deref()
    }
}
