use std::future::Future;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use url::Url;

use crate::blob::Blob;
use crate::body::Body;
use crate::ext::{normalize_method, validate_method, MethodExt};
use crate::form::FormData;
use crate::headers::Headers;
use crate::payload::{BodyInit, Payload};
use crate::Error;

use super::AbortSignal;

/// Whether credentials travel with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Cache mode. Only `NoStore` and `NoCache` have an effect, by cache busting the url.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// Request mode. Recorded, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum Mode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
    Navigate,
}

/// Redirect mode. Recorded, redirects are whatever the transport does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

/// Headers given to a request, either a dictionary or raw pairs.
///
/// Raw pairs are forwarded to the transport as given and take precedence over
/// the normalized headers with the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum HeadersInit {
    Headers(Headers),
    Raw(Vec<(String, String)>),
}

impl From<Headers> for HeadersInit {
    fn from(v: Headers) -> Self {
        HeadersInit::Headers(v)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for HeadersInit {
    fn from(v: Vec<(K, V)>) -> Self {
        HeadersInit::Raw(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl HeadersInit {
    pub(crate) fn to_headers(&self) -> Result<Headers, Error> {
        match self {
            HeadersInit::Headers(h) => Ok(h.clone()),
            HeadersInit::Raw(pairs) => Headers::from_pairs(pairs.iter().map(|(k, v)| (k, v))),
        }
    }
}

/// Options for [`Request::new`].
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: Option<HeadersInit>,
    pub body: Option<BodyInit>,
    pub credentials: Option<Credentials>,
    pub cache: Option<CacheMode>,
    pub mode: Option<Mode>,
    pub redirect: Option<RedirectMode>,
    pub referrer: Option<String>,
    pub signal: Option<AbortSignal>,
}

/// A request descriptor.
#[derive(Debug)]
pub struct Request {
    url: String,
    method: String,
    headers: Headers,
    raw_headers: Option<Vec<(String, String)>>,
    credentials: Credentials,
    cache: CacheMode,
    mode: Mode,
    redirect: RedirectMode,
    referrer: String,
    signal: Option<AbortSignal>,
    body: Body,
}

impl Request {
    /// Create a request for `url`.
    pub fn new(url: &str, init: RequestInit) -> Result<Self, Error> {
        let method = init.method.as_deref().unwrap_or("GET");
        validate_method(method)?;
        let method = normalize_method(method);

        let (headers, raw_headers) = split_headers(init.headers.as_ref())?;

        Request::build(
            url.to_string(),
            method,
            headers,
            raw_headers,
            init,
            None,
        )
    }

    /// Create a request from another, taking over its body.
    ///
    /// The source body becomes used unless `init` brings its own body.
    pub fn from_request(input: &Request, init: RequestInit) -> Result<Self, Error> {
        if input.body_used() {
            return Err(Error::BodyUsed("Request"));
        }

        let method = match init.method.as_deref() {
            Some(m) => {
                validate_method(m)?;
                normalize_method(m)
            }
            None => input.method.clone(),
        };

        let (headers, raw_headers) = match init.headers.as_ref() {
            Some(h) => split_headers(Some(h))?,
            None => (input.headers.clone(), input.raw_headers.clone()),
        };

        let inherited = if init.body.is_none() {
            input.body.take()?
        } else {
            None
        };

        let init = RequestInit {
            credentials: init.credentials.or(Some(input.credentials)),
            cache: init.cache.or(Some(input.cache)),
            mode: init.mode.or(Some(input.mode)),
            redirect: init.redirect.or(Some(input.redirect)),
            referrer: init.referrer.or_else(|| Some(input.referrer.clone())),
            signal: init.signal.or_else(|| input.signal.clone()),
            ..init
        };

        Request::build(
            input.url.clone(),
            method,
            headers,
            raw_headers,
            init,
            inherited,
        )
    }

    fn build(
        url: String,
        method: String,
        mut headers: Headers,
        raw_headers: Option<Vec<(String, String)>>,
        init: RequestInit,
        inherited: Option<Rc<Payload>>,
    ) -> Result<Self, Error> {
        let has_body = init.body.is_some() || inherited.is_some();
        if has_body && !method.allows_body() {
            return Err(Error::Argument(
                "body not allowed for GET or HEAD requests".into(),
            ));
        }

        let body = match inherited {
            Some(p) => Body::with_payload("Request", Some(p)),
            None => Body::init("Request", init.body)?,
        };

        if let Some(p) = body.payload() {
            let hint = p.content_type_hint();
            if !hint.is_empty() && !headers.has("content-type") {
                headers.set("content-type", hint)?;
            }
        }

        let cache = init.cache.unwrap_or_default();
        let url = if matches!(cache, CacheMode::NoStore | CacheMode::NoCache) && !method.allows_body() {
            cache_bust(&url, now_millis())
        } else {
            url
        };

        Ok(Request {
            url,
            method,
            headers,
            raw_headers,
            credentials: init.credentials.unwrap_or_default(),
            cache,
            mode: init.mode.unwrap_or_default(),
            redirect: init.redirect.unwrap_or_default(),
            referrer: init.referrer.unwrap_or_else(|| "about:client".to_string()),
            signal: init.signal,
            body,
        })
    }

    /// Copy the request. The copy shares the body, which must be unread.
    pub fn try_clone(&self) -> Result<Self, Error> {
        if self.body_used() {
            return Err(Error::BodyUsed("Request"));
        }
        Ok(Request {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            raw_headers: self.raw_headers.clone(),
            credentials: self.credentials,
            cache: self.cache,
            mode: self.mode,
            redirect: self.redirect,
            referrer: self.referrer.clone(),
            signal: self.signal.clone(),
            body: Body::with_payload("Request", self.body.payload().cloned()),
        })
    }

    /// Request url, after cache busting.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Normalized method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn raw_headers(&self) -> Option<&[(String, String)]> {
        self.raw_headers.as_deref()
    }

    /// Credentials mode.
    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    /// Cache mode.
    pub fn cache(&self) -> CacheMode {
        self.cache
    }

    /// Request mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Redirect mode.
    pub fn redirect(&self) -> RedirectMode {
        self.redirect
    }

    /// Referrer, `about:client` unless given.
    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    /// Cancellation signal, if any.
    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    /// Hand the body to an exchange. Fails if it was already read.
    pub(crate) fn take_payload(&self) -> Result<Option<Rc<Payload>>, Error> {
        self.body.take()
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

type SplitHeaders = (Headers, Option<Vec<(String, String)>>);

fn split_headers(init: Option<&HeadersInit>) -> Result<SplitHeaders, Error> {
    let Some(init) = init else {
        return Ok((Headers::new(), None));
    };
    let raw = match init {
        HeadersInit::Headers(_) => None,
        HeadersInit::Raw(pairs) => Some(pairs.clone()),
    };
    Ok((init.to_headers()?, raw))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Replace or add a `_=<stamp>` query parameter.
///
/// Urls that do not parse as absolute get the parameter appended as text.
fn cache_bust(url: &str, stamp: u128) -> String {
    let stamp = stamp.to_string();

    let Ok(mut parsed) = Url::parse(url) else {
        trace!("Cache bust on unparsed url: {}", url);
        let (base, fragment) = url.split_at(url.find('#').unwrap_or(url.len()));
        let sep = if base.contains('?') { '&' } else { '?' };
        return format!("{}{}_={}{}", base, sep, stamp, fragment);
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match pairs.iter_mut().find(|(k, _)| k == "_") {
        Some((_, v)) => *v = stamp,
        None => pairs.push(("_".to_string(), stamp)),
    }

    parsed.query_pairs_mut().clear().extend_pairs(&pairs);
    parsed.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;

    fn run<F: Future>(f: F) -> F::Output {
        Scheduler::new().block_on(f).unwrap()
    }

    #[test]
    fn method_normalized() {
        let r = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("post".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.method(), "POST");

        let r = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("patch".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.method(), "patch");
    }

    #[test]
    fn get_with_body_is_rejected() {
        let err = Request::new(
            "http://x.test",
            RequestInit {
                body: Some("nope".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn body_sets_content_type() {
        let r = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("POST".into()),
                body: Some("hi".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            r.headers().get("content-type"),
            Some("text/plain;charset=UTF-8")
        );
    }

    #[test]
    fn explicit_content_type_wins() {
        let r = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("POST".into()),
                headers: Some(vec![("Content-Type", "application/json")].into()),
                body: Some("{}".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.raw_headers().map(|h| h.len()), Some(1));
    }

    #[test]
    fn invalid_header_is_syntax_error() {
        let err = Request::new(
            "http://x.test",
            RequestInit {
                headers: Some(vec![("bad name", "v")].into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn cache_bust_rewrites() {
        assert_eq!(cache_bust("http://x.test/a", 5), "http://x.test/a?_=5");
        assert_eq!(cache_bust("http://x.test/a?b=1", 5), "http://x.test/a?b=1&_=5");
        assert_eq!(
            cache_bust("http://x.test/a?_=1&b=2#frag", 5),
            "http://x.test/a?_=5&b=2#frag"
        );
        assert_eq!(cache_bust("http://x.test/a?_&b=2", 5), "http://x.test/a?_=5&b=2");
    }

    #[test]
    fn cache_bust_relative_url() {
        assert_eq!(cache_bust("/a", 5), "/a?_=5");
        assert_eq!(cache_bust("/a?b=1#top", 5), "/a?b=1&_=5#top");
    }

    #[test]
    fn no_store_get_busts_cache() {
        let r = Request::new(
            "http://x.test/a",
            RequestInit {
                cache: Some(CacheMode::NoStore),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(r.url().starts_with("http://x.test/a?_="));

        let r = Request::new(
            "http://x.test/a",
            RequestInit {
                method: Some("POST".into()),
                cache: Some(CacheMode::NoCache),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.url(), "http://x.test/a");
    }

    #[test]
    fn from_request_takes_body() {
        let a = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("PUT".into()),
                body: Some("payload".into()),
                credentials: Some(Credentials::Include),
                ..Default::default()
            },
        )
        .unwrap();

        let b = Request::from_request(&a, RequestInit::default()).unwrap();
        assert!(a.body_used());
        assert_eq!(b.method(), "PUT");
        assert_eq!(b.credentials(), Credentials::Include);
        assert_eq!(run(b.text()).unwrap(), "payload");

        let err = Request::from_request(&a, RequestInit::default()).unwrap_err();
        assert_eq!(err, Error::BodyUsed("Request"));
    }

    #[test]
    fn from_bodyless_request_twice() {
        let a = Request::new("http://x.test", RequestInit::default()).unwrap();

        let b = Request::from_request(&a, RequestInit::default()).unwrap();
        assert!(!a.body_used());
        let c = Request::from_request(&a, RequestInit::default()).unwrap();

        assert_eq!(b.url(), "http://x.test");
        assert_eq!(c.method(), "GET");
        assert!(!c.body_used());
    }

    #[test]
    fn clone_shares_payload() {
        let a = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("POST".into()),
                body: Some("x".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let b = a.try_clone().unwrap();
        assert_eq!(run(a.text()).unwrap(), "x");
        assert_eq!(run(b.text()).unwrap(), "x");
        assert!(a.try_clone().is_err());
    }

    #[test]
    fn stream_body_unsupported() {
        let err = Request::new(
            "http://x.test",
            RequestInit {
                method: Some("POST".into()),
                body: Some(BodyInit::Stream),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
