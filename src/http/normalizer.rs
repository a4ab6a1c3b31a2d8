//! Header and query normalization ahead of framing.
//!
//! Turns the caller's raw header pairs into a [`HeaderSet`] ready for the
//! wire: framing headers are always removed (they are derived again from the
//! body), and in proxy mode every hop-by-hop header is removed as well.

use crate::http::headers::HeaderSet;
use crate::http::query::QueryParams;
use std::net::IpAddr;

/// Headers describing the framing of the message being replaced.
const FRAMING_HEADERS: &[&str] = &["Content-Length", "Transfer-Encoding"];

/// Headers scoped to a single hop (RFC 9110 section 7.6.1), plus `Host`
/// which a proxy re-derives from the upstream target.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "TE",
    "Trailer",
    "Upgrade",
    "Host",
];

pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Policy adjustments applied on top of the caller's headers.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOverrides {
    /// Strip hop-by-hop headers and record the client in `X-Forwarded-For`.
    pub proxy_mode: bool,
    /// Immediate client address, appended to `X-Forwarded-For` in proxy mode.
    pub client_address: Option<IpAddr>,
    /// Names removed after merging.
    pub remove_headers: Vec<String>,
    /// Values that replace whatever the caller sent for the same name.
    pub set_headers: Vec<(String, String)>,
    /// Query pairs appended after the caller's.
    pub extra_query: Vec<(String, String)>,
}

impl NormalizeOverrides {
    pub fn proxy(client_address: Option<IpAddr>) -> Self {
        Self {
            proxy_mode: true,
            client_address,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_headers.push((name.into(), value.into()));
        self
    }

    pub fn without_header(mut self, name: impl Into<String>) -> Self {
        self.remove_headers.push(name.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_query.push((key.into(), value.into()));
        self
    }
}

/// Merge raw headers and query pairs into their wire-ready form.
///
/// Never fails: values that are not valid header text are carried as opaque
/// strings and left for the serializer to reject.
pub fn normalize<H, K, V>(
    headers: H,
    query: &QueryParams,
    overrides: &NormalizeOverrides,
) -> (HeaderSet, QueryParams)
where
    H: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let raw: Vec<(K, V)> = headers.into_iter().collect();

    // Names listed in Connection are scoped to this hop too.
    let connection_scoped: Vec<String> = if overrides.proxy_mode {
        raw.iter()
            .filter(|(k, _)| k.as_ref().eq_ignore_ascii_case("Connection"))
            .flat_map(|(_, v)| v.as_ref().split(','))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    } else {
        Vec::new()
    };

    let mut out = HeaderSet::new();
    for (name, value) in &raw {
        let name = name.as_ref();
        if is_listed(FRAMING_HEADERS, name) {
            continue;
        }
        if overrides.proxy_mode
            && (is_listed(HOP_BY_HOP_HEADERS, name)
                || connection_scoped.iter().any(|t| t.eq_ignore_ascii_case(name)))
        {
            continue;
        }
        out.append(name, value.as_ref());
    }

    for name in &overrides.remove_headers {
        out.remove(name);
    }
    for (name, value) in &overrides.set_headers {
        if is_listed(FRAMING_HEADERS, name) {
            continue;
        }
        out.set(name.as_str(), value.as_str());
    }

    if overrides.proxy_mode {
        if let Some(addr) = overrides.client_address {
            append_forwarded_for(&mut out, addr);
        }
    }

    let mut query = query.clone();
    query.extend(overrides.extra_query.iter().cloned());

    (out, query)
}

/// Append the client to `X-Forwarded-For`, extending the last value as a
/// list so earlier hops are kept.
pub fn append_forwarded_for(headers: &mut HeaderSet, addr: IpAddr) {
    match headers.last_value_mut(X_FORWARDED_FOR) {
        Some(last) if !last.trim().is_empty() => {
            last.push_str(", ");
            last.push_str(&addr.to_string());
        }
        Some(last) => *last = addr.to_string(),
        None => headers.append(X_FORWARDED_FOR, addr.to_string()),
    }
}

fn is_listed(list: &[&str], name: &str) -> bool {
    list.iter().any(|h| h.eq_ignore_ascii_case(name))
}
