//! Policy steps applied between receiving and forwarding a request.

use crate::base::neterror::RequestError;
use crate::http::request::OutboundRequest;
use crate::reverse::inbound::InboundRequest;
use async_trait::async_trait;

/// Rewrites the outbound request before it is sent upstream.
///
/// A step may replace headers, query pairs or the body. Framing is derived
/// again afterwards, so a step never sets `Content-Length` itself.
#[async_trait]
pub trait RequestTransform: Send + Sync {
    async fn apply(
        &self,
        inbound: &InboundRequest,
        outbound: &mut OutboundRequest,
    ) -> Result<(), RequestError>;
}

#[async_trait]
impl<F> RequestTransform for F
where
    F: Fn(&InboundRequest, &mut OutboundRequest) -> Result<(), RequestError> + Send + Sync,
{
    async fn apply(
        &self,
        inbound: &InboundRequest,
        outbound: &mut OutboundRequest,
    ) -> Result<(), RequestError> {
        self(inbound, outbound)
    }
}
