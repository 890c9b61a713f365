use std::future::Future;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::blob::Blob;
use crate::body::Body;
use crate::form::FormData;
use crate::headers::Headers;
use crate::payload::{BodyInit, Payload};
use crate::Error;

use super::request::HeadersInit;

/// Statuses accepted by [`Response::redirect`].
const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Received from the transport.
    Basic,
    /// Constructed locally.
    Default,
    /// The network error response.
    Error,
}

/// Options for [`Response::new`].
#[derive(Debug)]
#[allow(missing_docs)]
pub struct ResponseInit {
    pub status: u16,
    pub status_text: String,
    pub headers: Option<HeadersInit>,
}

impl Default for ResponseInit {
    fn default() -> Self {
        ResponseInit {
            status: 200,
            status_text: String::new(),
            headers: None,
        }
    }
}

/// A response descriptor.
#[derive(Debug)]
pub struct Response {
    kind: ResponseKind,
    status: u16,
    status_text: String,
    headers: Headers,
    url: String,
    body: Body,
}

impl Response {
    /// Create a response. The status must be in `200..=599`.
    pub fn new(body: Option<BodyInit>, init: ResponseInit) -> Result<Self, Error> {
        if !(200..=599).contains(&init.status) {
            return Err(Error::Range(format!(
                "status {} outside 200..=599",
                init.status
            )));
        }

        let mut headers = match &init.headers {
            Some(h) => h.to_headers()?,
            None => Headers::new(),
        };

        let body = Body::init("Response", body)?;
        if let Some(p) = body.payload() {
            let hint = p.content_type_hint();
            if !hint.is_empty() && !headers.has("content-type") {
                headers.set("content-type", hint)?;
            }
        }

        Ok(Response {
            kind: ResponseKind::Default,
            status: init.status,
            status_text: init.status_text,
            headers,
            url: String::new(),
            body,
        })
    }

    /// The network error response.
    pub fn error() -> Self {
        Response {
            kind: ResponseKind::Error,
            status: 0,
            status_text: String::new(),
            headers: Headers::new(),
            url: String::new(),
            body: Body::with_payload("Response", None),
        }
    }

    /// A redirect to `url`. Only 301, 302, 303, 307 and 308 are accepted.
    pub fn redirect(url: &str, status: u16) -> Result<Self, Error> {
        if !REDIRECT_STATUSES.contains(&status) {
            return Err(Error::Range(format!("invalid redirect status: {}", status)));
        }
        let mut headers = Headers::new();
        headers.set("location", url)?;
        Response::new(
            None,
            ResponseInit {
                status,
                headers: Some(HeadersInit::Headers(headers)),
                ..Default::default()
            },
        )
    }

    /// A response with `value` serialized as JSON.
    pub fn from_json<T: Serialize + ?Sized>(value: &T, init: ResponseInit) -> Result<Self, Error> {
        let given = match &init.headers {
            Some(h) => h.to_headers()?.has("content-type"),
            None => false,
        };
        let text = serde_json::to_string(value)?;
        let mut response = Response::new(Some(BodyInit::Text(text)), init)?;
        if !given {
            response.headers.set("content-type", "application/json")?;
        }
        Ok(response)
    }

    pub(crate) fn from_transport(
        status: u16,
        status_text: String,
        headers: Headers,
        url: String,
        bytes: Vec<u8>,
    ) -> Result<Self, Error> {
        if !(200..=599).contains(&status) {
            return Err(Error::Network(format!("invalid status: {}", status)));
        }
        let content_type = headers.get("content-type").unwrap_or("").to_string();
        let payload = Rc::new(Payload::from_bytes(bytes, &content_type));
        Ok(Response {
            kind: ResponseKind::Basic,
            status,
            status_text,
            headers,
            url,
            body: Body::with_payload("Response", Some(payload)),
        })
    }

    /// Copy the response. The copy shares the body, which must be unread.
    pub fn try_clone(&self) -> Result<Self, Error> {
        if self.body_used() {
            return Err(Error::BodyUsed("Response"));
        }
        Ok(Response {
            kind: self.kind,
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            url: self.url.clone(),
            body: Body::with_payload("Response", self.body.payload().cloned()),
        })
    }

    /// Where the response came from.
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Status code, 0 for the error response.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Tell if the status is in `200..=299`.
    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Status reason phrase.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Final url after redirects, empty for local responses.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tell if the body has been read.
    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    /// Read the body as text.
    pub fn text(&self) -> impl Future<Output = Result<String, Error>> {
        self.body.text()
    }

    /// Read the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> impl Future<Output = Result<T, Error>> {
        self.body.json()
    }

    /// Read the body as bytes.
    pub fn array_buffer(&self) -> impl Future<Output = Result<Vec<u8>, Error>> {
        self.body.array_buffer()
    }

    /// Read the body as bytes.
    pub fn bytes(&self) -> impl Future<Output = Result<Vec<u8>, Error>> {
        self.body.bytes()
    }

    /// Read the body as a blob.
    pub fn blob(&self) -> impl Future<Output = Result<Blob, Error>> {
        self.body.blob()
    }

    /// Read the body as multipart form data.
    pub fn form_data(&self) -> impl Future<Output = Result<FormData, Error>> {
        self.body.form_data(self.headers.get("content-type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form;
    use crate::scheduler::Scheduler;

    fn run<F: Future>(f: F) -> F::Output {
        Scheduler::new().block_on(f).unwrap()
    }

    #[test]
    fn default_is_ok() {
        let r = Response::new(None, ResponseInit::default()).unwrap();
        assert_eq!(r.status(), 200);
        assert!(r.ok());
        assert_eq!(r.kind(), ResponseKind::Default);
        assert_eq!(run(r.text()).unwrap(), "");
    }

    #[test]
    fn status_range() {
        let err = Response::new(
            None,
            ResponseInit {
                status: 999,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Range(_)));

        let r = Response::new(
            None,
            ResponseInit {
                status: 404,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!r.ok());
    }

    #[test]
    fn error_response() {
        let r = Response::error();
        assert_eq!(r.status(), 0);
        assert_eq!(r.kind(), ResponseKind::Error);
        assert!(!r.ok());
    }

    #[test]
    fn redirect_statuses() {
        let r = Response::redirect("http://x.test/b", 302).unwrap();
        assert_eq!(r.headers().get("location"), Some("http://x.test/b"));
        assert!(matches!(
            Response::redirect("http://x.test/b", 200),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn json_round_trip() {
        let r = Response::from_json(&serde_json::json!({"a": 1}), ResponseInit::default()).unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        let v: serde_json::Value = run(r.json()).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn json_keeps_given_content_type() {
        let init = ResponseInit {
            headers: Some(vec![("Content-Type", "text/plain;charset=UTF-8")].into()),
            ..Default::default()
        };
        let r = Response::from_json(&[1, 2], init).unwrap();
        assert_eq!(
            r.headers().get("content-type"),
            Some("text/plain;charset=UTF-8")
        );

        let init = ResponseInit {
            headers: Some(vec![("X-A", "1")].into()),
            ..Default::default()
        };
        let r = Response::from_json(&[1, 2], init).unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
    }

    #[test]
    fn body_read_once() {
        let r = Response::new(Some("abc".into()), ResponseInit::default()).unwrap();
        let copy = r.try_clone().unwrap();
        assert_eq!(run(r.text()).unwrap(), "abc");
        assert_eq!(run(r.text()).unwrap_err(), Error::BodyUsed("Response"));
        assert!(r.try_clone().is_err());
        assert_eq!(run(copy.array_buffer()).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn form_data_from_multipart_body() {
        let mut f = FormData::new();
        f.append("field", "value");
        let r = Response::new(Some(f.into()), ResponseInit::default()).unwrap();
        let ct = r.headers().get("content-type").unwrap().to_string();
        assert!(form::boundary_from_content_type(&ct).is_some());

        let back = run(r.form_data()).unwrap();
        assert_eq!(back.get("field").and_then(|v| v.as_text()), Some("value"));
    }

    #[test]
    fn transport_status_checked() {
        let err = Response::from_transport(
            999,
            String::new(),
            Headers::new(),
            String::new(),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
