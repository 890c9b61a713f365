//! URL parameter list with `application/x-www-form-urlencoded` serialization.

use std::fmt;

use url::form_urlencoded;

/// Ordered list of name/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSearchParams {
    pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string. A leading `?` is ignored.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);

        let pairs = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        UrlSearchParams { pairs }
    }

    /// Append a pair.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// First value for the name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlSearchParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        UrlSearchParams {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for UrlSearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.pairs)
            .finish();
        f.write_str(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize() {
        let mut p = UrlSearchParams::new();
        p.append("q", "a b");
        p.append("x", "1&2=3");
        p.append("emoji", "é");
        assert_eq!(p.to_string(), "q=a+b&x=1%262%3D3&emoji=%C3%A9");
    }

    #[test]
    fn parse() {
        let p = UrlSearchParams::parse("?q=a+b&x=1%262%3D3&flag&emoji=%C3%A9");
        assert_eq!(p.get("q"), Some("a b"));
        assert_eq!(p.get("x"), Some("1&2=3"));
        assert_eq!(p.get("flag"), Some(""));
        assert_eq!(p.get("emoji"), Some("é"));
        assert_eq!(p.get("nope"), None);
    }

    #[test]
    fn broken_percent_kept() {
        let p = UrlSearchParams::parse("a=100%&b=%zz");
        assert_eq!(p.get("a"), Some("100%"));
        assert_eq!(p.get("b"), Some("%zz"));
    }

    #[test]
    fn from_iter_keeps_order() {
        let p: UrlSearchParams = [("b", "2"), ("a", "1")].into_iter().collect();
        let keys: Vec<_> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
