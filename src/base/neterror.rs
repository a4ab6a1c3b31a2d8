use crate::http::request::OutboundRequest;
use crate::http::response::InboundResponse;
use std::fmt;
use thiserror::Error;

/// Network error codes.
///
/// Numeric values follow Chromium's `net_error_list.h` where an equivalent
/// exists. Codes specific to this crate live below -10000.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Generic
    #[error("Operation aborted")]
    Aborted,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("Operation timed out")]
    TimedOut,
    #[error("Upload stream cannot be rewound")]
    UploadStreamRewindNotSupported,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Proxy auth unsupported")]
    ProxyAuthUnsupported,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Proxy auth requested")]
    ProxyAuthRequested,
    #[error("Proxy connection failed")]
    ProxyConnectionFailed,
    #[error("Unable to reuse connection for proxy auth")]
    UnableToReuseConnectionForProxyAuth,

    // Certificate Errors
    #[error("Certificate common name invalid")]
    CertCommonNameInvalid,
    #[error("Certificate authority invalid")]
    CertAuthorityInvalid,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Unsafe redirect")]
    UnsafeRedirect,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Method not supported")]
    MethodNotSupported,
    #[error("Unexpected proxy auth")]
    UnexpectedProxyAuth,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Invalid auth credentials")]
    InvalidAuthCredentials,
    #[error("Unsupported auth scheme")]
    UnsupportedAuthScheme,
    #[error("Missing auth credentials")]
    MissingAuthCredentials,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,

    // Crate-specific errors (custom codes starting at -10001)
    #[error("Framing decision conflicts with the body")]
    FramingConflict,
    #[error("Invalid auth challenge")]
    InvalidAuthChallenge,
    #[error("Invalid header")]
    InvalidHeader,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::InvalidArgument => -4,
            NetError::TimedOut => -7,
            NetError::UploadStreamRewindNotSupported => -25,

            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::SslProtocolError => -107,
            NetError::AddressUnreachable => -109,
            NetError::TunnelConnectionFailed => -111,
            NetError::ProxyAuthUnsupported => -115,
            NetError::ConnectionTimedOut => -118,
            NetError::ProxyAuthRequested => -127,
            NetError::ProxyConnectionFailed => -130,
            NetError::UnableToReuseConnectionForProxyAuth => -170,

            NetError::CertCommonNameInvalid => -200,
            NetError::CertAuthorityInvalid => -202,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::UnsafeRedirect => -311,
            NetError::InvalidResponse => -320,
            NetError::InvalidChunkedEncoding => -321,
            NetError::MethodNotSupported => -322,
            NetError::UnexpectedProxyAuth => -323,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::InvalidAuthCredentials => -338,
            NetError::UnsupportedAuthScheme => -339,
            NetError::MissingAuthCredentials => -341,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::InvalidHttpResponse => -370,

            NetError::FramingConflict => -10001,
            NetError::InvalidAuthChallenge => -10002,
            NetError::InvalidHeader => -10003,

            NetError::Unknown(code) => *code,
        }
    }

    /// Coarse category used by callers to decide how to react.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::Aborted => ErrorCategory::Aborted,
            NetError::TimedOut
            | NetError::TooManyRedirects
            | NetError::InvalidRedirect
            | NetError::UnsafeRedirect => ErrorCategory::RedirectLoopOrTimeout,
            NetError::ConnectionClosed
            | NetError::ConnectionReset
            | NetError::ConnectionRefused
            | NetError::ConnectionAborted
            | NetError::ConnectionFailed
            | NetError::NameNotResolved
            | NetError::AddressUnreachable
            | NetError::ConnectionTimedOut
            | NetError::ProxyConnectionFailed => ErrorCategory::ConnectFailed,
            NetError::TunnelConnectionFailed | NetError::UnexpectedProxyAuth => {
                ErrorCategory::TunnelRejected
            }
            NetError::SslProtocolError
            | NetError::CertCommonNameInvalid
            | NetError::CertAuthorityInvalid => ErrorCategory::TlsFailed,
            NetError::ProxyAuthUnsupported
            | NetError::ProxyAuthRequested
            | NetError::UnableToReuseConnectionForProxyAuth
            | NetError::InvalidAuthCredentials
            | NetError::UnsupportedAuthScheme
            | NetError::MissingAuthCredentials
            | NetError::InvalidAuthChallenge => ErrorCategory::AuthFailed,
            NetError::FramingConflict
            | NetError::ContentLengthMismatch
            | NetError::UploadStreamRewindNotSupported => ErrorCategory::FramingConflict,
            NetError::InvalidArgument
            | NetError::InvalidUrl
            | NetError::UnknownUrlScheme
            | NetError::MethodNotSupported
            | NetError::InvalidHeader => ErrorCategory::InvalidRequest,
            NetError::InvalidResponse
            | NetError::InvalidChunkedEncoding
            | NetError::EmptyResponse
            | NetError::ResponseHeadersTooBig
            | NetError::IncompleteChunkedEncoding
            | NetError::InvalidHttpResponse
            | NetError::Unknown(_) => ErrorCategory::Protocol,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -4 => NetError::InvalidArgument,
            -7 => NetError::TimedOut,
            -25 => NetError::UploadStreamRewindNotSupported,

            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -109 => NetError::AddressUnreachable,
            -111 => NetError::TunnelConnectionFailed,
            -115 => NetError::ProxyAuthUnsupported,
            -118 => NetError::ConnectionTimedOut,
            -127 => NetError::ProxyAuthRequested,
            -130 => NetError::ProxyConnectionFailed,
            -170 => NetError::UnableToReuseConnectionForProxyAuth,

            -200 => NetError::CertCommonNameInvalid,
            -202 => NetError::CertAuthorityInvalid,

            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -311 => NetError::UnsafeRedirect,
            -320 => NetError::InvalidResponse,
            -321 => NetError::InvalidChunkedEncoding,
            -322 => NetError::MethodNotSupported,
            -323 => NetError::UnexpectedProxyAuth,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -338 => NetError::InvalidAuthCredentials,
            -339 => NetError::UnsupportedAuthScheme,
            -341 => NetError::MissingAuthCredentials,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,
            -370 => NetError::InvalidHttpResponse,

            -10001 => NetError::FramingConflict,
            -10002 => NetError::InvalidAuthChallenge,
            -10003 => NetError::InvalidHeader,

            _ => NetError::Unknown(code),
        }
    }
}

/// What kind of failure terminated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// TCP connect or DNS failure, to the origin or to the proxy.
    ConnectFailed,
    /// The proxy answered CONNECT with a non-2xx status.
    TunnelRejected,
    /// TLS handshake or certificate verification failed.
    TlsFailed,
    /// Authentication could not be completed.
    AuthFailed,
    /// Redirect hop cap reached, redirect target unusable, or the shared
    /// deadline expired.
    RedirectLoopOrTimeout,
    /// A body disagreed with the framing chosen for it.
    FramingConflict,
    /// The peer spoke malformed HTTP.
    Protocol,
    /// The caller cancelled the operation.
    Aborted,
    /// The request could not be built.
    InvalidRequest,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of a forwarding operation.
///
/// Carries the triggering request and response when they are known so the
/// caller can report exactly what went over the wire.
#[derive(Error)]
#[error("{code} ({}): {message}", .code.as_i32())]
pub struct RequestError {
    code: NetError,
    message: String,
    #[source]
    source: Option<BoxError>,
    request: Option<Box<OutboundRequest>>,
    response: Option<Box<InboundResponse>>,
}

impl RequestError {
    pub fn new(code: NetError, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            request: None,
            response: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_request(mut self, request: OutboundRequest) -> Self {
        self.request = Some(Box::new(request));
        self
    }

    /// Attaches the request only if none is recorded yet.
    pub fn or_request(mut self, request: &OutboundRequest) -> Self {
        if self.request.is_none() {
            self.request = Some(Box::new(request.clone()));
        }
        self
    }

    pub fn with_response(mut self, response: InboundResponse) -> Self {
        self.response = Some(Box::new(response));
        self
    }

    pub fn code(&self) -> NetError {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn request(&self) -> Option<&OutboundRequest> {
        self.request.as_deref()
    }

    pub fn response(&self) -> Option<&InboundResponse> {
        self.response.as_deref()
    }

    pub fn into_response(self) -> Option<InboundResponse> {
        self.response.map(|r| *r)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.code, NetError::TimedOut)
    }
}

impl From<NetError> for RequestError {
    fn from(code: NetError) -> Self {
        RequestError::new(code, code.to_string())
    }
}

impl fmt::Debug for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestError")
            .field("code", &self.code)
            .field("category", &self.category())
            .field("message", &self.message)
            .field("source", &self.source)
            .field("request", &self.request.as_ref().map(|r| r.uri().as_str().to_owned()))
            .field("status", &self.response.as_ref().map(|r| r.status()))
            .finish()
    }
}
