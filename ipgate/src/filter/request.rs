//! Request model consumed by the gate

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A metadata leaf or a nested table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    Table(RequestMeta),
}

/// Transport-level metadata of a request (peer address, forwarded headers, ...)
///
/// Keys keep insertion order. Nested tables are reached with dotted lookup
/// paths, so `lookup("proxy.client")` reads `client` inside the `proxy` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RequestMeta {
    fields: IndexMap<String, MetaValue>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a text field, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), MetaValue::Text(value.into()));
    }

    /// Set a nested table, replacing any previous value
    pub fn nest(&mut self, key: impl Into<String>, table: RequestMeta) {
        self.fields.insert(key.into(), MetaValue::Table(table));
    }

    /// Builder-style [`RequestMeta::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Resolve a dotted path to a text value.
    ///
    /// Returns `None` when a segment is missing, when the path runs through a
    /// text value, or when it ends on a table.
    pub fn lookup(&self, path: &str) -> Option<&str> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;

        for segment in segments {
            match current {
                MetaValue::Table(table) => current = table.fields.get(segment)?,
                MetaValue::Text(_) => return None,
            }
        }

        match current {
            MetaValue::Text(value) => Some(value),
            MetaValue::Table(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestMeta {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = RequestMeta::new();
        for (key, value) in iter {
            meta.insert(key, value);
        }
        meta
    }
}

/// One inbound request as seen by the gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequest {
    /// Request path, already URL-decoded
    pub path: String,
    pub meta: RequestMeta,
}

impl AccessRequest {
    pub fn new(path: impl Into<String>, meta: RequestMeta) -> Self {
        Self {
            path: path.into(),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_lookup() {
        let meta: RequestMeta = [("REMOTE_ADDR", "10.0.0.1"), ("HTTP_X_FORWARDED_FOR", "")]
            .into_iter()
            .collect();

        assert_eq!(meta.lookup("REMOTE_ADDR"), Some("10.0.0.1"));
        assert_eq!(meta.lookup("HTTP_X_FORWARDED_FOR"), Some(""));
        assert_eq!(meta.lookup("HTTP_CLIENT_IP"), None);
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn test_nested_lookup() {
        let mut meta = RequestMeta::new();
        meta.nest(
            "proxy",
            RequestMeta::new().with("client", "203.0.113.5"),
        );
        meta.insert("REMOTE_ADDR", "10.0.0.1");

        assert_eq!(meta.lookup("proxy.client"), Some("203.0.113.5"));
        assert_eq!(meta.lookup("proxy"), None);
        assert_eq!(meta.lookup("proxy.missing"), None);
        assert_eq!(meta.lookup("REMOTE_ADDR.deeper"), None);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let meta = RequestMeta::new().with("b", "2").with("a", "1");
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let meta: RequestMeta = toml::from_str(
            r#"
REMOTE_ADDR = "192.0.2.7"

[forwarded]
for = "198.51.100.1"
"#,
        )
        .unwrap();

        assert_eq!(meta.lookup("REMOTE_ADDR"), Some("192.0.2.7"));
        assert_eq!(meta.lookup("forwarded.for"), Some("198.51.100.1"));
    }
}
