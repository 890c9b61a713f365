//! Case-insensitive header dictionary.
//!
//! Each name holds a single combined value. Appending to an existing name joins
//! the values with `", "`, which is how a header list is exposed to scripts.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::Error;

/// Header dictionary keyed by lowercased header name.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HeaderMap,
}

impl Headers {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, appending in order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Headers::new();
        for (k, v) in pairs {
            headers.append(k.as_ref(), v.as_ref())?;
        }
        Ok(headers)
    }

    /// Append a value, joining with any existing value for the same name.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = parse_name(name)?;
        let value = normalize_value(value);

        let joined = match self.map.get(&name) {
            Some(existing) => {
                let mut v = existing.as_bytes().to_vec();
                v.extend_from_slice(b", ");
                v.extend_from_slice(value.as_bytes());
                HeaderValue::from_bytes(&v)?
            }
            None => HeaderValue::from_bytes(value.as_bytes())?,
        };

        self.map.insert(name, joined);
        Ok(())
    }

    /// Replace any existing value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = parse_name(name)?;
        let value = HeaderValue::from_bytes(normalize_value(value).as_bytes())?;
        self.map.insert(name, value);
        Ok(())
    }

    /// Look up a value. Invalid names simply yield `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        self.map
            .get(name)
            .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
    }

    /// Tell if the name is present.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a name. Returns whether it was present.
    pub fn delete(&mut self, name: &str) -> bool {
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => self.map.remove(name).is_some(),
            Err(_) => false,
        }
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.map.keys_len()
    }

    /// Tell if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate `(name, value)` pairs sorted by lowercased name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut all: Vec<(&str, &str)> = self
            .map
            .iter()
            .filter_map(|(k, v)| Some((k.as_str(), std::str::from_utf8(v.as_bytes()).ok()?)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all.into_iter()
    }

    /// Render as a raw header block, `name: value\r\n` per line.
    pub fn to_raw(&self) -> String {
        let mut s = String::new();
        for (k, v) in self.iter() {
            s.push_str(k);
            s.push_str(": ");
            s.push_str(v);
            s.push_str("\r\n");
        }
        s
    }

    /// Parse a raw header block such as the one produced by [`Headers::to_raw`].
    ///
    /// Lines that do not parse as headers are skipped, the same leniency a
    /// browser applies when exposing response headers.
    pub fn parse_raw(raw: &str) -> Headers {
        let mut headers = Headers::new();

        for line in raw.split("\r\n").flat_map(|l| l.split('\n')) {
            if line.trim().is_empty() {
                continue;
            }

            let mut block = line.as_bytes().to_vec();
            block.extend_from_slice(b"\r\n\r\n");

            let mut parsed = [httparse::EMPTY_HEADER; 1];
            let Ok(httparse::Status::Complete((_, [h]))) =
                httparse::parse_headers(&block, &mut parsed)
            else {
                trace!("Skip unparseable header line: {:?}", line);
                continue;
            };

            let Ok(value) = std::str::from_utf8(h.value) else {
                continue;
            };

            if let Err(e) = headers.append(h.name, value) {
                trace!("Skip bad header {:?}: {}", h.name, e);
            }
        }

        headers
    }
}

pub(crate) fn parse_name(name: &str) -> Result<HeaderName, Error> {
    if name.is_empty() {
        return Err(Error::Syntax("empty header name".into()));
    }
    Ok(HeaderName::from_bytes(name.as_bytes())?)
}

fn normalize_value(value: &str) -> &str {
    value.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
