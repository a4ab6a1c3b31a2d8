use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::str::FromStr;

/// Case-preserving, order-preserving HTTP/1.1 header multi-map.
///
/// Header names are case-insensitive on the wire, but some servers and
/// signature schemes check exact casing, so the first casing seen for a name
/// is the one emitted. Values added later under a differently-cased name
/// merge into that first entry. Each value stays a separate entry: nothing is
/// folded into a comma-joined string unless [`HeaderSet::joined`] is asked
/// for explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Add a value, keeping any existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values.push(value),
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// Replace all values for the name with a single value.
    ///
    /// An existing entry keeps its casing and its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values = vec![value],
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// First value for the name (case-insensitive lookup).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].values.first())
            .map(String::as_str)
    }

    /// Last value for the name.
    pub fn get_last(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].values.last())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &str> {
        self.position(name)
            .map(|idx| self.entries[idx].values.as_slice())
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
    }

    pub(crate) fn last_value_mut(&mut self, name: &str) -> Option<&mut String> {
        self.position(name)
            .and_then(|idx| self.entries[idx].values.last_mut())
    }

    /// The casing the name was first recorded with.
    pub fn recorded_name(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove every value for the name, returning them.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).values)
    }

    /// Values joined with `", "`, for display and for list-valued headers.
    pub fn joined(&self, name: &str) -> Option<String> {
        self.position(name)
            .map(|idx| self.entries[idx].values.join(", "))
    }

    /// Comma-separated tokens across every value of a list header,
    /// trimmed and with empties dropped.
    pub fn tokens(&self, name: &str) -> Vec<&str> {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Whether a list header carries the token (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name)
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Every `(name, value)` pair in wire order.
    ///
    /// Names appear in first-occurrence order; all values of one name are
    /// emitted together under the recorded casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|e| {
            e.values
                .iter()
                .map(move |v| (e.name.as_str(), v.as_str()))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of values across all names.
    pub fn value_count(&self) -> usize {
        self.entries.iter().map(|e| e.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into an `http::HeaderMap`. Casing is lost; order of values
    /// per name is kept.
    pub fn to_header_map(&self) -> Result<HeaderMap, NetError> {
        let mut map = HeaderMap::with_capacity(self.value_count());
        for (name, value) in self.iter() {
            let name = HeaderName::from_str(name).map_err(|_| NetError::InvalidHeader)?;
            let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
            map.append(name, value);
        }
        Ok(map)
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        set.extend(iter);
        set
    }
}

impl<K, V> Extend<(K, V)> for HeaderSet
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_casing_wins() {
        let mut headers = HeaderSet::new();
        headers.append("X-Custom-Header", "one");
        headers.append("x-custom-header", "two");

        assert_eq!(headers.len(), 1);
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![("X-Custom-Header", "one"), ("X-Custom-Header", "two")]
        );
    }

    #[test]
    fn test_case_insensitive_get() {
        let mut headers = HeaderSet::new();
        headers.append("ACCEPT", "text/html");
        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get("Accept"), Some("text/html"));
        assert_eq!(headers.recorded_name("accept"), Some("ACCEPT"));
    }

    #[test]
    fn test_first_occurrence_order() {
        let headers: HeaderSet = vec![("a", "1"), ("B", "2"), ("A", "3")].into_iter().collect();
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("a", "3"), ("B", "2")]);
    }

    #[test]
    fn test_set_keeps_position_and_casing() {
        let mut headers = HeaderSet::new();
        headers.append("Host", "example.com");
        headers.append("Accept", "*/*");
        headers.append("Accept", "text/html");
        headers.set("accept", "application/json");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![("Host", "example.com"), ("Accept", "application/json")]
        );
    }

    #[test]
    fn test_remove_header() {
        let mut headers = HeaderSet::new();
        headers.append("X-Custom", "a");
        headers.append("x-custom", "b");
        assert_eq!(
            headers.remove("X-CUSTOM"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(headers.get("X-Custom").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_tokens() {
        let mut headers = HeaderSet::new();
        headers.append("Connection", "keep-alive, X-Hop");
        headers.append("connection", " Upgrade ,");
        assert_eq!(headers.tokens("CONNECTION"), vec!["keep-alive", "X-Hop", "Upgrade"]);
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn test_joined_and_last() {
        let mut headers = HeaderSet::new();
        headers.append("X-Forwarded-For", "10.0.0.1");
        headers.append("X-Forwarded-For", "10.0.0.2");
        assert_eq!(
            headers.joined("x-forwarded-for").as_deref(),
            Some("10.0.0.1, 10.0.0.2")
        );
        assert_eq!(headers.get_last("x-forwarded-for"), Some("10.0.0.2"));
        assert_eq!(headers.value_count(), 2);
    }

    #[test]
    fn test_to_header_map() {
        let mut headers = HeaderSet::new();
        headers.append("Content-Type", "text/plain");
        headers.append("X-Multi", "1");
        headers.append("X-Multi", "2");
        let map = headers.to_header_map().unwrap();
        assert_eq!(map.get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn test_invalid_header_name_conversion() {
        let mut headers = HeaderSet::new();
        headers.append("Invalid Header", "value");
        assert_eq!(headers.to_header_map().unwrap_err(), NetError::InvalidHeader);
    }
}
