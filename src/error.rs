use std::fmt;

use http::header::{InvalidHeaderName, InvalidHeaderValue};

/// Error type for xhr-fetch
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    InvalidState(&'static str),
    Argument(String),
    Syntax(String),
    Range(String),
    BodyUsed(&'static str),
    Unsupported(&'static str),
    Network(String),
    Timeout,
    Abort(String),
}

impl Error {
    /// Tell if this error is the outcome of a canceled exchange.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort(_))
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::Syntax(value.to_string())
    }
}

impl From<InvalidHeaderName> for Error {
    fn from(value: InvalidHeaderName) -> Self {
        Error::Syntax(format!("invalid header name: {}", value))
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(value: InvalidHeaderValue) -> Self {
        Error::Syntax(format!("invalid header value: {}", value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Syntax(value.to_string())
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState(v) => write!(f, "invalid state: {}", v),
            Error::Argument(v) => write!(f, "invalid argument: {}", v),
            Error::Syntax(v) => write!(f, "syntax error: {}", v),
            Error::Range(v) => write!(f, "out of range: {}", v),
            Error::BodyUsed(v) => write!(f, "{}: body stream already read", v),
            Error::Unsupported(v) => write!(f, "unsupported: {}", v),
            Error::Network(v) => write!(f, "network request failed: {}", v),
            Error::Timeout => write!(f, "network request timed out"),
            Error::Abort(v) => write!(f, "aborted: {}", v),
        }
    }
}
