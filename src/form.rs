//! Multipart form data.
//!
//! Wire format:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="<name>"[; filename="<filename>"]\r\n
//! [Content-Type: <type>\r\n]
//! \r\n
//! <content>\r\n
//! --<boundary>--
//! ```
//!
//! Names and file names escape `\n`, `\r` and `"` as `%0A`, `%0D` and `%22`.

use crate::blob::{Blob, File};
use crate::Error;

const BOUNDARY_PREFIX: &str = "----formdata-";

/// A single form value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// Plain text field.
    Text(String),
    /// File upload field.
    File(File),
}

impl FormValue {
    /// The text of a text field.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(v) => Some(v),
            FormValue::File(_) => None,
        }
    }

    /// The file of a file field.
    pub fn as_file(&self) -> Option<&File> {
        match self {
            FormValue::Text(_) => None,
            FormValue::File(f) => Some(f),
        }
    }
}

/// Ordered multipart form entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    /// Create an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((name.into(), FormValue::Text(value.into())));
    }

    /// Append a file field.
    pub fn append_file(&mut self, name: impl Into<String>, file: File) {
        self.entries.push((name.into(), FormValue::File(file)));
    }

    /// Append a blob, named `"blob"` like an unnamed browser upload.
    pub fn append_blob(&mut self, name: impl Into<String>, blob: Blob) {
        self.append_file(name, File::from_blob(blob, "blob"));
    }

    /// Replace all fields of the name with one text value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = FormValue::Text(value.into());
        match self.entries.iter().position(|(k, _)| k == name) {
            Some(idx) => {
                self.entries[idx].1 = value;
                let mut i = 0;
                self.entries.retain(|(k, _)| {
                    i += 1;
                    i - 1 == idx || k != name
                });
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// First value of the name.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// All values of the name.
    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v)
            .collect()
    }

    /// Tell if the name is present.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove all fields of the name.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(k, _)| k != name);
    }

    /// Iterate entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Tell if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fresh random boundary.
pub fn new_boundary() -> String {
    format!("{}{}", BOUNDARY_PREFIX, uuid::Uuid::new_v4().simple())
}

/// The `content-type` for a multipart body with the boundary.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Extract the boundary parameter from a `content-type` value.
///
/// Surrounding quotes are stripped.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower.find("boundary=")? + "boundary=".len();

    let rest = &content_type[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    let value = rest[..end].trim().trim_matches('"');

    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Serialize the form with the given boundary.
pub fn encode(form: &FormData, boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();

    for (name, value) in form.entries() {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\nContent-Disposition: form-data; name=\"");
        out.extend_from_slice(escape(name).as_bytes());
        out.push(b'"');

        match value {
            FormValue::Text(text) => {
                out.extend_from_slice(b"\r\n\r\n");
                out.extend_from_slice(text.as_bytes());
            }
            FormValue::File(file) => {
                out.extend_from_slice(b"; filename=\"");
                out.extend_from_slice(escape(file.name()).as_bytes());
                out.extend_from_slice(b"\"\r\n");
                let ct = file.blob().content_type();
                if !ct.is_empty() {
                    out.extend_from_slice(b"Content-Type: ");
                    out.extend_from_slice(ct.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(file.blob().as_bytes());
            }
        }

        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--");

    out
}

/// Strictly parse a multipart body.
///
/// If `declared` is set, it must equal the boundary on the first line. Any
/// structural problem fails the whole parse.
pub fn decode(input: &[u8], declared: Option<&str>) -> Result<FormData, Error> {
    let line_end = find(input, b"\r\n").unwrap_or(input.len());
    let first = &input[..line_end];

    let Some(embedded) = first.strip_prefix(b"--") else {
        return Err(syntax("missing boundary on first line"));
    };

    // An empty form is only the terminator.
    if line_end == input.len() || input[line_end..].iter().all(|b| *b == b'\r' || *b == b'\n') {
        if let Some(b) = embedded.strip_suffix(b"--") {
            check_boundary(b, declared)?;
            return Ok(FormData::new());
        }
    }

    check_boundary(embedded, declared)?;

    let mut delimiter = b"\r\n--".to_vec();
    delimiter.extend_from_slice(embedded);

    let mut form = FormData::new();
    let mut pos = line_end + 2;

    loop {
        let rest = input.get(pos..).unwrap_or_default();

        let head_end = find(rest, b"\r\n\r\n").ok_or_else(|| syntax("missing header separator"))?;
        let head = std::str::from_utf8(&rest[..head_end])
            .map_err(|_| syntax("part headers are not utf-8"))?;

        let body_start = head_end + 4;
        let body_len = find(&rest[body_start..], &delimiter)
            .ok_or_else(|| syntax("missing closing boundary"))?;
        let content = &rest[body_start..body_start + body_len];

        let (name, value) = parse_part(head, content)?;
        form.entries.push((name, value));

        let after = &rest[body_start + body_len + delimiter.len()..];

        if after.starts_with(b"--") {
            return Ok(form);
        } else if after.starts_with(b"\r\n") {
            pos += body_start + body_len + delimiter.len() + 2;
        } else {
            return Err(syntax("garbage after boundary"));
        }
    }
}

fn check_boundary(embedded: &[u8], declared: Option<&str>) -> Result<(), Error> {
    if embedded.is_empty() {
        return Err(syntax("empty boundary"));
    }
    match declared {
        Some(d) if d.as_bytes() != embedded => Err(syntax("boundary mismatch")),
        _ => Ok(()),
    }
}

fn parse_part(head: &str, content: &[u8]) -> Result<(String, FormValue), Error> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = "";

    for line in head.split("\r\n") {
        let Some((k, v)) = line.split_once(':') else {
            return Err(syntax("malformed part header"));
        };
        let v = v.trim();

        if k.trim().eq_ignore_ascii_case("content-disposition") {
            for (pk, pv) in disposition_params(v) {
                match pk.to_ascii_lowercase().as_str() {
                    "name" => name = Some(unescape(pv)),
                    "filename" => filename = Some(unescape(pv)),
                    _ => {}
                }
            }
        } else if k.trim().eq_ignore_ascii_case("content-type") {
            content_type = v;
        }
    }

    let name = name.ok_or_else(|| syntax("part without name="))?;

    let value = match filename {
        Some(filename) => FormValue::File(File::new(content.to_vec(), filename, content_type)),
        None => FormValue::Text(String::from_utf8_lossy(content).into_owned()),
    };

    Ok((name, value))
}

// Splits `form-data; name="a"; filename="b"` into key/value pairs.
fn disposition_params(v: &str) -> Vec<(&str, &str)> {
    let mut params = Vec::new();
    let mut rest = v;

    while let Some(semi) = rest.find(';') {
        rest = rest[semi + 1..].trim_start();
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];

        if let Some(quoted) = after.strip_prefix('"') {
            let Some(close) = quoted.find('"') else {
                break;
            };
            params.push((key, &quoted[..close]));
            rest = &quoted[close + 1..];
        } else {
            let end = after.find(';').unwrap_or(after.len());
            params.push((key, after[..end].trim()));
            rest = &after[end..];
        }
    }

    params
}

fn escape(s: &str) -> String {
    s.replace('\n', "%0A")
        .replace('\r', "%0D")
        .replace('"', "%22")
}

fn unescape(s: &str) -> String {
    s.replace("%0A", "\n")
        .replace("%0D", "\r")
        .replace("%22", "\"")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn syntax(msg: &str) -> Error {
    Error::Syntax(format!("multipart: {}", msg))
}
