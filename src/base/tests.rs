use crate::base::neterror::{ErrorCategory, NetError, RequestError};

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // Crate-specific error
    let custom = NetError::FramingConflict;
    let custom_code = custom.as_i32();
    assert_eq!(custom_code, -10001);
    assert!(matches!(NetError::from(custom_code), NetError::FramingConflict));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
    assert_eq!(err.category(), ErrorCategory::Protocol);
}

#[test]
fn test_collision_avoidance() {
    // Chromium reserves -900..=-906 for blob errors.
    let blob_range = -906..=-900;
    for err in [
        NetError::FramingConflict,
        NetError::InvalidAuthChallenge,
        NetError::InvalidHeader,
    ] {
        assert!(!blob_range.contains(&err.as_i32()));
    }
}

#[test]
fn test_categories() {
    assert_eq!(NetError::ConnectionRefused.category(), ErrorCategory::ConnectFailed);
    assert_eq!(NetError::ProxyConnectionFailed.category(), ErrorCategory::ConnectFailed);
    assert_eq!(NetError::TunnelConnectionFailed.category(), ErrorCategory::TunnelRejected);
    assert_eq!(NetError::CertCommonNameInvalid.category(), ErrorCategory::TlsFailed);
    assert_eq!(NetError::MissingAuthCredentials.category(), ErrorCategory::AuthFailed);
    assert_eq!(NetError::TooManyRedirects.category(), ErrorCategory::RedirectLoopOrTimeout);
    assert_eq!(NetError::TimedOut.category(), ErrorCategory::RedirectLoopOrTimeout);
    assert_eq!(NetError::ContentLengthMismatch.category(), ErrorCategory::FramingConflict);
    assert_eq!(NetError::Aborted.category(), ErrorCategory::Aborted);
    assert_eq!(NetError::InvalidUrl.category(), ErrorCategory::InvalidRequest);
}

#[test]
fn test_request_error_display() {
    let err = RequestError::new(NetError::TooManyRedirects, "stopped after 5 hops");
    assert_eq!(
        err.to_string(),
        "Too many redirects (-310): stopped after 5 hops"
    );
    assert!(err.request().is_none());
    assert!(err.response().is_none());
    assert!(!err.is_timeout());
}

#[test]
fn test_request_error_from_code() {
    let err: RequestError = NetError::TimedOut.into();
    assert!(err.is_timeout());
    assert_eq!(err.message(), "Operation timed out");
}
