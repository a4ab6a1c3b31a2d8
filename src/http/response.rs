//! HTTP Response with body access.

use crate::base::neterror::{NetError, RequestError};
use crate::http::headers::HeaderSet;
use bytes::Bytes;
use http::{StatusCode, Version};
use url::Url;

/// A response read from the upstream, with its body fully buffered.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    status: StatusCode,
    version: Version,
    reason: String,
    headers: HeaderSet,
    body: Bytes,
    url: Url,
}

impl InboundResponse {
    pub fn new(
        status: StatusCode,
        version: Version,
        reason: impl Into<String>,
        headers: HeaderSet,
        body: Bytes,
        url: Url,
    ) -> Self {
        Self {
            status,
            version,
            reason: reason.into(),
            headers,
            body,
            url,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Reason phrase exactly as the server sent it.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Headers with the server's casing and order.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The URL this response was read from (after redirects).
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get("Location")
    }

    /// Consume the response and return the body bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Consume the response and decode the body as UTF-8.
    pub fn text(self) -> Result<String, RequestError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| {
            RequestError::new(NetError::InvalidResponse, "response body is not UTF-8").with_source(e)
        })
    }

    /// Consume the response and decode the body as JSON.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RequestError::new(NetError::InvalidResponse, format!("invalid JSON body: {}", e))
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> InboundResponse {
        let mut headers = HeaderSet::new();
        headers.append("Content-Type", "application/json");
        headers.append("X-Trace", "a");
        InboundResponse::new(
            StatusCode::OK,
            Version::HTTP_11,
            "Alright",
            headers,
            Bytes::from_static(body),
            Url::parse("http://example.com/").unwrap(),
        )
    }

    #[test]
    fn test_accessors() {
        let resp = response(b"{}");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.reason(), "Alright");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.headers().recorded_name("x-trace"), Some("X-Trace"));
        assert!(!resp.is_redirect());
    }

    #[test]
    fn test_text() {
        assert_eq!(response(b"hello").text().unwrap(), "hello");
        let err = response(&[0xff, 0xfe]).text().unwrap_err();
        assert_eq!(err.code(), NetError::InvalidResponse);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json() {
        #[derive(serde::Deserialize)]
        struct Body {
            ok: bool,
        }
        let body: Body = response(br#"{"ok":true}"#).json().unwrap();
        assert!(body.ok);
    }
}
