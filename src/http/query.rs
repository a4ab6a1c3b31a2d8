//! Ordered query parameters with repeated keys.
//!
//! Pairs parsed from a request keep the exact text they arrived with and are
//! written back byte for byte. Only pairs added by the caller are encoded.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;

/// Bytes escaped in keys and values added through [`QueryParams::append`].
///
/// Everything RFC 3986 allows in a query stays literal except the pair
/// separators `&`, `=` and `+`, which would change how the pair is read back.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Bytes that can never appear in a request-target. Raw rendering escapes
/// only these, so caller-encoded `%XX` sequences pass through.
const REQUEST_TARGET_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryPair {
    key: String,
    value: String,
    /// The segment as it appeared on the wire, for parsed pairs.
    wire: Option<String>,
}

/// Ordered `(key, value)` query pairs. Repeated keys are separate entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<QueryPair>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Parse a query string (without the leading `?`). Order and repeats are
    /// kept; lookups see decoded text, rendering reproduces the input.
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                let (key, value) = form_urlencoded::parse(segment.as_bytes())
                    .next()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .unwrap_or_default();
                QueryPair {
                    key,
                    value,
                    wire: Some(segment.to_string()),
                }
            })
            .collect();
        Self { pairs }
    }

    /// Add a decoded pair, encoded when rendered.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push(QueryPair {
            key: key.into(),
            value: value.into(),
            wire: None,
        });
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|p| p.key != key);
        before - self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|p| (p.key.as_str(), p.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Query string with appended pairs percent-encoded. Spaces become
    /// `%20`, never `+`.
    pub fn encode(&self) -> String {
        self.render(true)
    }

    /// Query string with appended pairs written as given, for callers that
    /// pre-encoded them.
    pub fn raw(&self) -> String {
        self.render(false)
    }

    /// Parsed pairs are always written exactly as received. Appended pairs
    /// are encoded, or under `encode == false` only stripped of bytes a
    /// request line cannot carry.
    pub fn render(&self, encode: bool) -> String {
        let set = if encode {
            QUERY_COMPONENT
        } else {
            REQUEST_TARGET_UNSAFE
        };
        let mut out = String::new();
        for (i, pair) in self.pairs.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            match &pair.wire {
                Some(wire) => out.push_str(wire),
                None => {
                    out.extend(utf8_percent_encode(&pair.key, set));
                    out.push('=');
                    out.extend(utf8_percent_encode(&pair.value, set));
                }
            }
        }
        out
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Self::new();
        query.extend(iter);
        query
    }
}

impl<K, V> Extend<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}
