//! HTTP Basic authentication (RFC 7617).

use crate::http::auth::digest::{parse_param, split_params};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// `Basic <base64(username:password)>`.
pub fn encode(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

/// Decode a `Basic <base64>` credential into `(username, password)`.
pub fn decode(header: &str) -> Option<(String, String)> {
    let (scheme, b64) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(b64.trim()).ok()?;
    let s = String::from_utf8(decoded).ok()?;
    let (username, password) = s.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// `realm` parameter of a Basic challenge, if any.
pub fn parse_realm(params: &str) -> Option<String> {
    split_params(params)
        .into_iter()
        .filter_map(|p| parse_param(p).ok())
        .find(|(key, _)| key.eq_ignore_ascii_case("realm"))
        .map(|(_, value)| value.to_string())
}
