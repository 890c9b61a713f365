//! Request lifecycle state machine.
//!
//! An [`XmlHttpRequest`] wraps the callback based [`Transport`] into readiness
//! states and progress events.
//!
//! ```text
//!    ┌──────────────────┐
//!    │      UNSENT      │◀─────────────────────────┐
//!    └──────────────────┘                          │
//!              │ open()                            │
//!              ▼                                   │
//!    ┌──────────────────┐                          │
//!    │      OPENED      │─────────┐                │
//!    └──────────────────┘         │                │
//!              │ success          │ fail/timeout   │
//!              ▼                  │ abort          │
//!    ┌──────────────────┐         │                │
//!    │ HEADERS_RECEIVED │         │                │
//!    └──────────────────┘         │                │
//!              │                  │                │
//!              ▼                  │                │
//!    ┌──────────────────┐         │                │
//!    │     LOADING      │─────────┤                │
//!    └──────────────────┘         │                │
//!              │ complete         │                │
//!              ▼                  ▼                │
//!    ┌──────────────────────────────────┐  abort   │
//!    │               DONE               │─ ─ ─ ─ ─ ┘
//!    └──────────────────────────────────┘  (reset)
//! ```
//!
//! Events for one exchange always follow `loadstart`, then exactly one of
//! `load`/`error`/`timeout`/`abort`, then `loadend`. `readystatechange` fires once
//! per actual change of state.
//!
//! Each `open()` and `abort()` starts a new generation. Transport callbacks, timers
//! and deferred continuations carry the generation they were created for and are
//! dropped if it is no longer current. That is what keeps overlapping
//! open/abort/timeout/complete races correct.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::blob::Blob;
use crate::event::{EventKind, EventTarget, ListenerId};
use crate::ext::{normalize_method, validate_method};
use crate::headers::Headers;
use crate::payload::{BodyInit, Payload, Representation};
use crate::scheduler::{Scheduler, TimerId};
use crate::transport::{Task, Transport};
use crate::Error;

mod exchange;

/// Readiness states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    /// Not opened yet, or reset by abort.
    Unsent = 0,
    /// `open()` was called.
    Opened = 1,
    /// Status and headers are available.
    HeadersReceived = 2,
    /// The body is being materialized.
    Loading = 3,
    /// The exchange is over.
    Done = 4,
}

/// How to decode the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Text, also the empty response type.
    #[default]
    Text,
    /// Raw bytes.
    ArrayBuffer,
    /// A [`Blob`] typed from the response `content-type`.
    Blob,
    /// Parsed JSON.
    Json,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    /// For [`ResponseType::Text`].
    Text(String),
    /// For [`ResponseType::ArrayBuffer`].
    Bytes(Vec<u8>),
    /// For [`ResponseType::Blob`].
    Blob(Blob),
    /// For [`ResponseType::Json`].
    Json(serde_json::Value),
}

/// Client for one exchange at a time over an injected transport.
///
/// Cloning gives another handle to the same object.
#[derive(Clone)]
pub struct XmlHttpRequest {
    shared: Rc<Shared>,
}

pub(crate) struct Shared {
    scheduler: Scheduler,
    transport: Rc<dyn Transport>,
    events: EventTarget,
    upload: EventTarget,
    state: RefCell<State>,
}

// Per exchange scratch state, reset by open() and by abort().
pub(crate) struct State {
    ready_state: ReadyState,
    generation: u64,
    armed: bool,
    reset_pending: bool,
    sent: bool,
    ended: bool,
    errored: bool,
    // `load` fired, only complete is still outstanding.
    loaded: bool,
    upload_total: Option<u64>,

    method: String,
    url: String,
    request_headers: Headers,

    response_headers: Option<Headers>,
    status: u16,
    status_text: String,
    response_url: String,
    raw_body: Option<Representation>,
    response: Option<ResponseValue>,

    response_type: ResponseType,
    mime_override: Option<String>,
    with_credentials: bool,
    timeout: Duration,
    timer: Option<TimerId>,
    task: Option<Box<dyn Task>>,
}

impl State {
    fn new() -> Self {
        State {
            ready_state: ReadyState::Unsent,
            generation: 0,
            armed: false,
            reset_pending: false,
            sent: false,
            ended: false,
            errored: false,
            loaded: false,
            upload_total: None,
            method: String::new(),
            url: String::new(),
            request_headers: Headers::new(),
            response_headers: None,
            status: 0,
            status_text: String::new(),
            response_url: String::new(),
            raw_body: None,
            response: None,
            response_type: ResponseType::Text,
            mime_override: None,
            with_credentials: false,
            timeout: Duration::ZERO,
            timer: None,
            task: None,
        }
    }

    fn clear_response(&mut self) {
        self.response_headers = None;
        self.status = 0;
        self.status_text.clear();
        self.response_url.clear();
        self.raw_body = None;
        self.response = None;
    }

    /// Length of the response body, from `content-length` if present.
    fn content_length(&self) -> u64 {
        self.response_headers
            .as_ref()
            .and_then(|h| h.get("content-length"))
            .and_then(|v| v.parse().ok())
            .or_else(|| self.raw_body.as_ref().map(|b| b.as_bytes().len() as u64))
            .unwrap_or(0)
    }

    fn response_content_type(&self) -> String {
        self.mime_override
            .clone()
            .or_else(|| {
                self.response_headers
                    .as_ref()
                    .and_then(|h| h.get("content-type"))
                    .map(|v| v.to_string())
            })
            .unwrap_or_default()
    }
}

impl XmlHttpRequest {
    /// Create a request object that starts its tasks on `transport`.
    pub fn new(scheduler: Scheduler, transport: Rc<dyn Transport>) -> Self {
        XmlHttpRequest {
            shared: Rc::new(Shared {
                scheduler,
                transport,
                events: EventTarget::new(),
                upload: EventTarget::new(),
                state: RefCell::new(State::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakXmlHttpRequest {
        WeakXmlHttpRequest(Rc::downgrade(&self.shared))
    }

    /// Listen to events on the request itself.
    pub fn add_event_listener(
        &self,
        kind: EventKind,
        f: impl Fn(&crate::event::Event) + 'static,
    ) -> ListenerId {
        self.shared.events.add_listener(kind, f)
    }

    /// Remove a listener added with [`XmlHttpRequest::add_event_listener`].
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_listener(id)
    }

    /// Events for the request body upload.
    pub fn upload(&self) -> &EventTarget {
        &self.shared.upload
    }

    /// Current readiness state.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.borrow().ready_state
    }

    /// Response status, 0 until a response is received or after a failure.
    pub fn status(&self) -> u16 {
        self.shared.state.borrow().status
    }

    /// Reason phrase or, after a failure, the transport error message.
    pub fn status_text(&self) -> String {
        self.shared.state.borrow().status_text.clone()
    }

    /// The final url of the response, empty before headers are received.
    pub fn response_url(&self) -> String {
        self.shared.state.borrow().response_url.clone()
    }

    /// The decoded response, set just before `load`.
    pub fn response(&self) -> Option<ResponseValue> {
        self.shared.state.borrow().response.clone()
    }

    /// The response as text. Only valid for [`ResponseType::Text`].
    pub fn response_text(&self) -> Result<String, Error> {
        let st = self.shared.state.borrow();
        if st.response_type != ResponseType::Text {
            return Err(Error::InvalidState("response_text requires the text response type"));
        }
        if st.ready_state < ReadyState::Loading {
            return Ok(String::new());
        }
        Ok(match &st.raw_body {
            Some(Representation::Text(s)) => s.clone(),
            Some(Representation::Buffer(b)) => String::from_utf8_lossy(b).into_owned(),
            None => String::new(),
        })
    }

    /// One response header, values joined with `", "`.
    pub fn get_response_header(&self, name: &str) -> Option<String> {
        let st = self.shared.state.borrow();
        if st.ready_state < ReadyState::HeadersReceived {
            return None;
        }
        st.response_headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(|v| v.to_string())
    }

    /// All response headers as `name: value\r\n` lines, names lowercased and sorted.
    pub fn get_all_response_headers(&self) -> String {
        let st = self.shared.state.borrow();
        if st.ready_state < ReadyState::HeadersReceived {
            return String::new();
        }
        st.response_headers
            .as_ref()
            .map(|h| h.to_raw())
            .unwrap_or_default()
    }

    /// Known length of the response body, 0 if unknown.
    pub fn content_length(&self) -> u64 {
        self.shared.state.borrow().content_length()
    }

    /// Configured timeout. Zero means none.
    pub fn timeout(&self) -> Duration {
        self.shared.state.borrow().timeout
    }

    /// Set the timeout for the next `send()`. Zero disables it.
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.state.borrow_mut().timeout = timeout;
    }

    /// Configured response type.
    pub fn response_type(&self) -> ResponseType {
        self.shared.state.borrow().response_type
    }

    /// Choose how the response body is decoded.
    pub fn set_response_type(&self, response_type: ResponseType) -> Result<(), Error> {
        let mut st = self.shared.state.borrow_mut();
        if st.ready_state >= ReadyState::Loading {
            return Err(Error::InvalidState("response type set while loading"));
        }
        st.response_type = response_type;
        Ok(())
    }

    /// Whether credentials are forwarded to the transport.
    pub fn with_credentials(&self) -> bool {
        self.shared.state.borrow().with_credentials
    }

    /// Forward credentials to the transport. Not allowed once sent.
    pub fn set_with_credentials(&self, v: bool) -> Result<(), Error> {
        let mut st = self.shared.state.borrow_mut();
        if st.ready_state > ReadyState::Opened || (st.sent && !st.ended) {
            return Err(Error::InvalidState("with_credentials set after send"));
        }
        st.with_credentials = v;
        Ok(())
    }

    /// Decode the response as if it had this `content-type`.
    pub fn override_mime_type(&self, mime: &str) -> Result<(), Error> {
        let mut st = self.shared.state.borrow_mut();
        if st.ready_state >= ReadyState::Loading {
            return Err(Error::InvalidState("override_mime_type while loading"));
        }
        st.mime_override = Some(mime.to_string());
        Ok(())
    }

    /// Start a new exchange.
    pub fn open(&self, method: &str, url: &str) -> Result<(), Error> {
        self.open_with_credentials(method, url, None, None)
    }

    /// Start a new exchange, embedding `user`/`password` as basic authorization.
    pub fn open_with_credentials(
        &self,
        method: &str,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), Error> {
        validate_method(method)?;
        let method = normalize_method(method);

        let (generation, task, timer) = {
            let mut st = self.shared.state.borrow_mut();

            st.generation += 1;
            let task = st.task.take();
            let timer = st.timer.take();

            st.method = method;
            st.url = url.to_string();
            st.request_headers = Headers::new();
            st.clear_response();
            st.armed = true;
            st.reset_pending = false;
            st.sent = false;
            st.ended = false;
            st.errored = false;
            st.loaded = false;
            st.upload_total = None;

            if user.is_some() || password.is_some() {
                let creds = format!("{}:{}", user.unwrap_or(""), password.unwrap_or(""));
                let auth = format!("Basic {}", BASE64_STANDARD.encode(creds));
                st.request_headers.set("authorization", &auth)?;
            }

            (st.generation, task, timer)
        };

        // A previous exchange still in flight is superseded.
        if let Some(task) = task {
            debug!("open() supersedes a running task");
            task.abort();
        }
        if let Some(timer) = timer {
            self.shared.scheduler.clear_timeout(timer);
        }

        debug!("open {} {}", self.shared.state.borrow().method, url);

        self.shared.change_state(generation, ReadyState::Opened);
        Ok(())
    }

    /// Set a request header. Only allowed between `open()` and `send()`.
    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), Error> {
        let mut st = self.shared.state.borrow_mut();
        if st.ready_state != ReadyState::Opened || !st.armed {
            return Err(Error::InvalidState("set_request_header requires OPENED"));
        }
        st.request_headers.append(name, value)
    }

    /// Send the request. The body is ignored for GET and HEAD.
    pub fn send(&self, body: Option<BodyInit>) -> Result<(), Error> {
        let payload = match body {
            Some(init) => Some(Rc::new(Payload::new(init)?)),
            None => None,
        };
        self.send_payload(payload)
    }

    pub(crate) fn send_payload(&self, payload: Option<Rc<Payload>>) -> Result<(), Error> {
        Shared::send(&self.shared, payload)
    }

    /// Cancel the exchange.
    ///
    /// The local state reaches DONE and `abort`/`loadend` fire even if the
    /// transport can not actually stop the remote operation. Calling it again
    /// before the reset has been applied does nothing.
    pub fn abort(&self) {
        Shared::abort(&self.shared)
    }
}

impl fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.borrow();
        f.debug_struct("XmlHttpRequest")
            .field("ready_state", &st.ready_state)
            .field("method", &st.method)
            .field("url", &st.url)
            .field("status", &st.status)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakXmlHttpRequest(std::rc::Weak<Shared>);

impl WeakXmlHttpRequest {
    pub fn upgrade(&self) -> Option<XmlHttpRequest> {
        self.0.upgrade().map(|shared| XmlHttpRequest { shared })
    }
}

pub(crate) fn decode_response(
    raw: &Representation,
    response_type: ResponseType,
    content_type: &str,
) -> Result<ResponseValue, Error> {
    Ok(match response_type {
        ResponseType::Text => ResponseValue::Text(match raw {
            Representation::Text(s) => s.clone(),
            Representation::Buffer(b) => String::from_utf8_lossy(b).into_owned(),
        }),
        ResponseType::ArrayBuffer => ResponseValue::Bytes(raw.as_bytes().to_vec()),
        ResponseType::Blob => ResponseValue::Blob(Blob::new(raw.as_bytes(), content_type)),
        ResponseType::Json => ResponseValue::Json(serde_json::from_slice(raw.as_bytes())?),
    })
}
