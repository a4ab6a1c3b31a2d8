//! Redirect following.
//!
//! Rebuilds the request for each 3xx hop the way Chromium's
//! `RedirectInfo::ComputeRedirectInfo` and `RedirectUtil::UpdateHttpRequest`
//! do: 303 turns into GET, 301/302 turn POST into GET, 307/308 keep method
//! and body. The rebuilt request is a new value; the caller normalizes and
//! freezes it again before sending.

use crate::base::neterror::{NetError, RequestError};
use crate::http::request::OutboundRequest;
use crate::http::requestbody::BodyDescriptor;
use crate::http::response::InboundResponse;
use http::{Method, StatusCode};
use tracing::debug;
use url::Url;

pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Headers that describe a body. Removed when the redirect drops the body.
const BODY_HEADERS: &[&str] = &[
    "Content-Type",
    "Content-Encoding",
    "Content-Language",
    "Content-Location",
];

/// Headers never carried to a different origin.
const CREDENTIAL_HEADERS: &[&str] = &["Authorization", "Proxy-Authorization", "Cookie"];

/// Whether `status` is a redirect this follower acts on.
pub fn is_followable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Method for the next hop.
pub fn redirect_method(status: StatusCode, method: &Method) -> Method {
    match status {
        StatusCode::SEE_OTHER if *method != Method::HEAD => Method::GET,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

/// Resolve `location` against the URL that answered.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, RequestError> {
    let url = base.join(location.trim()).map_err(|e| {
        RequestError::new(
            NetError::InvalidRedirect,
            format!("invalid redirect location {:?}: {}", location, e),
        )
        .with_source(e)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RequestError::new(
            NetError::UnsafeRedirect,
            format!("redirect to unsupported scheme {}", other),
        )),
    }
}

/// Build the request for the hop `response` points to.
///
/// Returns `None` when the response is not a followable redirect or has
/// no `Location`; the 3xx is then the final answer.
pub fn rebuild(
    current: &OutboundRequest,
    response: &InboundResponse,
) -> Result<Option<OutboundRequest>, RequestError> {
    if !is_followable(response.status()) {
        return Ok(None);
    }
    let Some(location) = response.location() else {
        return Ok(None);
    };
    let target = resolve_location(&current.full_url(), location)?;
    let method = redirect_method(response.status(), current.method());
    let keep_body = response.status() != StatusCode::SEE_OTHER && method == *current.method();

    let mut next = OutboundRequest::from_url(method, target)?;
    let cross_origin = current.origin()? != next.origin()?;

    let headers = next.headers_mut();
    for (name, value) in current.headers().iter() {
        if name.eq_ignore_ascii_case("Host") {
            continue;
        }
        if cross_origin && CREDENTIAL_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        if !keep_body && BODY_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        headers.append(name, value);
    }

    if keep_body {
        if !current.body().is_repeatable() {
            return Err(RequestError::new(
                NetError::UploadStreamRewindNotSupported,
                format!("{} redirect needs the body again", response.status().as_u16()),
            )
            .with_request(current.clone()));
        }
        next.set_body(current.body().clone());
    } else {
        next.set_body(BodyDescriptor::Empty);
    }

    debug!(
        status = response.status().as_u16(),
        from = %current.uri(),
        to = %next.uri(),
        method = %next.method(),
        cross_origin,
        "following redirect"
    );
    Ok(Some(next))
}

/// Counts hops and enforces the cap.
#[derive(Debug, Clone)]
pub struct RedirectFollower {
    max_redirects: u32,
    hops: u32,
    chain: Vec<Url>,
}

impl Default for RedirectFollower {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDIRECTS)
    }
}

impl RedirectFollower {
    pub fn new(max_redirects: u32) -> Self {
        Self {
            max_redirects,
            hops: 0,
            chain: Vec::new(),
        }
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// URLs redirected away from, in order.
    pub fn chain(&self) -> &[Url] {
        &self.chain
    }

    /// Next request to send, or `None` when `response` is final.
    ///
    /// Fails with `TooManyRedirects` once the cap is reached; the error
    /// carries the last 3xx.
    pub fn follow(
        &mut self,
        current: &OutboundRequest,
        response: &InboundResponse,
    ) -> Result<Option<OutboundRequest>, RequestError> {
        let next = match rebuild(current, response) {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e.with_response(response.clone()).or_request(current)),
        };
        if self.hops >= self.max_redirects {
            return Err(RequestError::new(
                NetError::TooManyRedirects,
                format!("stopped after {} redirects", self.hops),
            )
            .with_response(response.clone())
            .with_request(current.clone()));
        }
        self.hops += 1;
        self.chain.push(current.full_url());
        Ok(Some(next))
    }
}

/// Whether two requests target the same scheme, host and port.
pub fn same_origin(a: &OutboundRequest, b: &OutboundRequest) -> bool {
    match (a.origin(), b.origin()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
