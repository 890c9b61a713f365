//! Immutable binary objects.

use std::fmt;
use std::rc::Rc;

/// Immutable bytes with a media type.
///
/// Cloning shares the underlying bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    bytes: Rc<[u8]>,
    content_type: String,
}

impl Blob {
    /// Create a blob. The type is lowercased, and dropped if it is not printable ascii.
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: &str) -> Self {
        let content_type = if content_type.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            content_type.to_ascii_lowercase()
        } else {
            String::new()
        };

        let bytes: Vec<u8> = bytes.into();

        Blob {
            bytes: Rc::from(bytes),
            content_type,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Media type, empty if unknown.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Snapshot of the bytes.
    pub fn array_buffer(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Lossy UTF-8 view of the bytes.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl Default for Blob {
    fn default() -> Self {
        Blob::new(Vec::new(), "")
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("size", &self.size())
            .field("type", &self.content_type)
            .finish()
    }
}

/// A blob with a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    blob: Blob,
    name: String,
}

impl File {
    /// Create a named file.
    pub fn new(bytes: impl Into<Vec<u8>>, name: impl Into<String>, content_type: &str) -> Self {
        File {
            blob: Blob::new(bytes, content_type),
            name: name.into(),
        }
    }

    /// Name a blob.
    pub fn from_blob(blob: Blob, name: impl Into<String>) -> Self {
        File {
            blob,
            name: name.into(),
        }
    }

    /// The file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file contents.
    pub fn blob(&self) -> &Blob {
        &self.blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_normalized() {
        assert_eq!(Blob::new(vec![], "Text/Plain").content_type(), "text/plain");
        assert_eq!(Blob::new(vec![], "bad\u{7f}").content_type(), "");
    }

    #[test]
    fn clone_shares_bytes() {
        let a = Blob::new(b"abc".to_vec(), "");
        let b = a.clone();
        assert!(std::ptr::eq(a.as_bytes(), b.as_bytes()));
        assert_eq!(b.size(), 3);
        assert_eq!(b.text(), "abc");
    }
}
