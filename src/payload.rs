//! Normalized request/response bodies.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::blob::{Blob, File};
use crate::form::{self, FormData};
use crate::params::UrlSearchParams;
use crate::Error;

const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Values accepted as a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyInit {
    /// A string, sent as `text/plain`.
    Text(String),
    /// URL parameters, sent form-urlencoded.
    Params(UrlSearchParams),
    /// A binary buffer or a view of one. Copied on use.
    Bytes(Vec<u8>),
    /// A blob, sent with its own type.
    Blob(Blob),
    /// A multipart form.
    Form(FormData),
    /// A readable stream. Never accepted, it fails with [`Error::Unsupported`].
    Stream,
}

impl BodyInit {
    /// Coerce any displayable value to its string form.
    pub fn display(v: impl fmt::Display) -> Self {
        BodyInit::Text(v.to_string())
    }
}

impl From<&str> for BodyInit {
    fn from(v: &str) -> Self {
        BodyInit::Text(v.to_string())
    }
}

impl From<String> for BodyInit {
    fn from(v: String) -> Self {
        BodyInit::Text(v)
    }
}

impl From<Vec<u8>> for BodyInit {
    fn from(v: Vec<u8>) -> Self {
        BodyInit::Bytes(v)
    }
}

impl From<&[u8]> for BodyInit {
    fn from(v: &[u8]) -> Self {
        BodyInit::Bytes(v.to_vec())
    }
}

impl From<Blob> for BodyInit {
    fn from(v: Blob) -> Self {
        BodyInit::Blob(v)
    }
}

impl From<File> for BodyInit {
    fn from(v: File) -> Self {
        BodyInit::Blob(v.blob().clone())
    }
}

impl From<FormData> for BodyInit {
    fn from(v: FormData) -> Self {
        BodyInit::Form(v)
    }
}

impl From<UrlSearchParams> for BodyInit {
    fn from(v: UrlSearchParams) -> Self {
        BodyInit::Params(v)
    }
}

/// Transport ready form of a body.
#[derive(Clone, PartialEq, Eq)]
pub enum Representation {
    /// Text, sent UTF-8 encoded.
    Text(String),
    /// Raw bytes.
    Buffer(Rc<[u8]>),
}

impl Representation {
    /// The representation as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Representation::Text(s) => s.as_bytes(),
            Representation::Buffer(b) => b,
        }
    }
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Text(s) => write!(f, "Text({})", s.len()),
            Representation::Buffer(b) => write!(f, "Buffer({})", b.len()),
        }
    }
}

/// A body normalized to a [`Representation`], a content type hint and a lazily
/// computed byte length.
///
/// Never mutated after construction. Clones of requests and responses share
/// one payload through an `Rc`.
pub struct Payload {
    repr: Representation,
    content_type: String,
    byte_length: OnceCell<usize>,
}

impl Payload {
    /// Normalize a body value.
    ///
    /// Streams are not supported and fail with [`Error::Unsupported`].
    pub fn new(init: BodyInit) -> Result<Self, Error> {
        Ok(match init {
            BodyInit::Text(s) => Payload::with(Representation::Text(s), TEXT_PLAIN),
            BodyInit::Params(p) => Payload::with(Representation::Text(p.to_string()), FORM_URLENCODED),
            BodyInit::Bytes(b) => Payload::with(Representation::Buffer(Rc::from(b)), ""),
            BodyInit::Blob(b) => Payload::with(
                Representation::Buffer(Rc::from(b.array_buffer())),
                b.content_type(),
            ),
            BodyInit::Form(f) => {
                let boundary = form::new_boundary();
                let bytes = form::encode(&f, &boundary);
                Payload::with(
                    Representation::Buffer(Rc::from(bytes)),
                    &form::content_type(&boundary),
                )
            }
            BodyInit::Stream => return Err(Error::Unsupported("stream bodies")),
        })
    }

    /// Wrap bytes received from a transport.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, content_type: &str) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Payload::with(Representation::Buffer(Rc::from(bytes)), content_type)
    }

    fn with(repr: Representation, content_type: &str) -> Self {
        Payload {
            repr,
            content_type: content_type.to_string(),
            byte_length: OnceCell::new(),
        }
    }

    /// The transport ready representation.
    pub fn representation(&self) -> &Representation {
        &self.repr
    }

    /// The content type implied by the body value, empty if unknown.
    pub fn content_type_hint(&self) -> &str {
        &self.content_type
    }

    /// Encoded size in bytes. Computed on first access.
    pub fn byte_length(&self) -> usize {
        *self.byte_length.get_or_init(|| match &self.repr {
            Representation::Text(s) => s.len(),
            Representation::Buffer(b) => b.len(),
        })
    }

    /// Decode as UTF-8 text.
    pub fn text(&self) -> String {
        match &self.repr {
            Representation::Text(s) => s.clone(),
            Representation::Buffer(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Copy of the encoded bytes.
    pub fn array_buffer(&self) -> Vec<u8> {
        self.repr.as_bytes().to_vec()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("repr", &self.repr)
            .field("content_type", &self.content_type)
            .finish()
    }
}
