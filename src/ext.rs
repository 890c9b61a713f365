use http::Method;

use crate::Error;

/// Methods that are uppercased when given in any case.
const NORMALIZED: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];

/// Uppercase well known methods, leave others as given.
pub(crate) fn normalize_method(method: &str) -> String {
    NORMALIZED
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .map(|m| m.to_string())
        .unwrap_or_else(|| method.to_string())
}

/// Check the method is a valid token.
pub(crate) fn validate_method(method: &str) -> Result<(), Error> {
    Method::from_bytes(method.as_bytes())
        .map(|_| ())
        .map_err(|_| Error::Syntax(format!("invalid method: {:?}", method)))
}

pub(crate) trait MethodExt {
    /// GET and HEAD never carry a request body.
    fn allows_body(&self) -> bool;
}

impl MethodExt for str {
    fn allows_body(&self) -> bool {
        !(self == Method::GET.as_str() || self == Method::HEAD.as_str())
    }
}
