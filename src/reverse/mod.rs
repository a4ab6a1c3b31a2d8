//! Reverse proxy mode.
//!
//! Takes a request received from a downstream client and forwards it to a
//! fixed upstream: headers are normalized in proxy mode (hop-by-hop headers
//! dropped, `X-Forwarded-For` extended), policy transforms run, and the
//! result goes out through a [`Client`] with framing derived from whatever
//! body the transforms left behind.

pub mod inbound;
pub mod transform;

pub use inbound::InboundRequest;
pub use transform::RequestTransform;

use crate::base::neterror::{NetError, RequestError};
use crate::client::Client;
use crate::http::framing;
use crate::http::normalizer::{normalize, NormalizeOverrides};
use crate::http::query::QueryParams;
use crate::http::request::OutboundRequest;
use crate::http::response::InboundResponse;
use crate::options::Options;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

pub struct ReverseProxy {
    client: Client,
    upstream: Url,
    options: Options,
    transforms: Vec<Arc<dyn RequestTransform>>,
}

impl ReverseProxy {
    /// Forward to `upstream`; its path, if any, prefixes every request path.
    pub fn new(client: Client, upstream: &str) -> Result<Self, RequestError> {
        let upstream = Url::parse(upstream).map_err(|e| {
            RequestError::new(NetError::InvalidUrl, format!("{}: {}", upstream, e)).with_source(e)
        })?;
        if !matches!(upstream.scheme(), "http" | "https") || upstream.host_str().is_none() {
            return Err(RequestError::new(
                NetError::InvalidUrl,
                format!("{} is not an http(s) upstream", upstream),
            ));
        }
        // Forwarded responses go back to the client as they are.
        let options = client.default_options().clone().with_follow_redirects(false);
        Ok(Self {
            client,
            upstream,
            options,
            transforms: Vec::new(),
        })
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Append a policy step. Steps run in the order added.
    pub fn with_transform<T: RequestTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    fn upstream_url(&self, path: &str) -> Url {
        let mut url = self.upstream.clone();
        let base = url.path().trim_end_matches('/');
        let path = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        url.set_path(&path);
        url.set_query(None);
        url
    }

    /// The upstream request for `inbound`, before any transform. The body
    /// is shared: a live stream is still read only once.
    pub fn build_outbound(&self, inbound: &InboundRequest) -> Result<OutboundRequest, RequestError> {
        let url = self.upstream_url(inbound.path());
        let query = inbound.raw_query().map(QueryParams::parse).unwrap_or_default();
        let overrides = NormalizeOverrides::proxy(inbound.client_addr().map(|a| a.ip()));
        let (headers, query) = normalize(
            inbound.headers().iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &query,
            &overrides,
        );
        Ok(OutboundRequest::from_url(inbound.method().clone(), url)?
            .with_headers(headers)
            .with_query_params(query)
            .with_body(inbound.body().clone()))
    }

    /// Forward `inbound` upstream and return the upstream response.
    pub async fn forward(&self, mut inbound: InboundRequest) -> Result<InboundResponse, RequestError> {
        inbound.set_cert_resolver(self.client.context().capabilities().client_certificate);
        debug!(
            method = %inbound.method(),
            target = inbound.target(),
            client = ?inbound.client_addr(),
            "reverse proxy request"
        );

        let mut outbound = self.build_outbound(&inbound)?;
        for transform in &self.transforms {
            transform.apply(&inbound, &mut outbound).await?;
        }
        trace!(
            framing = ?framing::resolve(outbound.body(), self.options.streaming_policy, outbound.method()),
            "framing after transforms"
        );
        self.client.send(outbound, self.options.clone()).await
    }
}
