//! Promise style exchanges on top of [`XmlHttpRequest`].
//!
//! [`Client::fetch`] drives one lifecycle object per request and settles a single
//! [`ResponseFuture`] from its terminal event:
//!
//! | event     | outcome                               |
//! |-----------|---------------------------------------|
//! | `load`    | `Ok(Response)`, one tick after `load` |
//! | `error`   | `Err(Error::Network)`                 |
//! | `timeout` | `Err(Error::Timeout)`                 |
//! | `abort`   | `Err(Error::Abort)`                   |
//!
//! Dropping an unsettled [`ResponseFuture`] aborts the exchange.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::event::EventKind;
use crate::headers::Headers;
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use crate::xhr::{ReadyState, ResponseType, ResponseValue, XmlHttpRequest};
use crate::Error;

mod request;
mod response;
mod signal;

pub use request::{CacheMode, Credentials, HeadersInit, Mode, RedirectMode, Request, RequestInit};
pub use response::{Response, ResponseInit, ResponseKind};
pub use signal::{AbortController, AbortSignal};

const NETWORK_FAILED: &str = "Network request failed";
const ABORTED: &str = "The operation was aborted.";

/// Runs requests over a transport.
#[derive(Clone)]
pub struct Client {
    scheduler: Scheduler,
    transport: Rc<dyn Transport>,
    default_timeout: Option<Duration>,
}

impl Client {
    /// Create a client that runs exchanges on `scheduler` over `transport`.
    pub fn new(scheduler: Scheduler, transport: Rc<dyn Transport>) -> Self {
        Client {
            scheduler,
            transport,
            default_timeout: None,
        }
    }

    /// Time out every exchange after `timeout`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// The scheduler exchanges run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Start an exchange for `request`.
    ///
    /// Nothing is sent before the scheduler runs. A signal that is already
    /// aborted settles the future without starting a transport task.
    pub fn fetch(&self, request: Request) -> ResponseFuture {
        let slot = Rc::new(RefCell::new(Slot::default()));

        if let Some(signal) = request.signal() {
            if let Err(e) = signal.throw_if_aborted() {
                debug!("fetch {} with aborted signal", request.url());
                settle(&slot, Err(e));
                return ResponseFuture { slot, xhr: None };
            }
        }

        match self.start(&request, &slot) {
            Ok(xhr) => ResponseFuture {
                slot,
                xhr: Some(xhr),
            },
            Err(e) => {
                settle(&slot, Err(e));
                ResponseFuture { slot, xhr: None }
            }
        }
    }

    fn start(&self, request: &Request, slot: &Rc<RefCell<Slot>>) -> Result<XmlHttpRequest, Error> {
        let payload = request.take_payload()?;

        let xhr = XmlHttpRequest::new(self.scheduler.clone(), self.transport.clone());
        xhr.set_response_type(ResponseType::ArrayBuffer)?;
        if let Some(timeout) = self.default_timeout {
            xhr.set_timeout(timeout);
        }

        self.wire_outcomes(&xhr, request, slot);

        xhr.open(request.method(), request.url())?;
        xhr.set_with_credentials(request.credentials() == Credentials::Include)?;

        // Raw headers go first, exactly as given. The normalized copy only
        // contributes names the raw list lacks.
        let mut seen: Vec<String> = Vec::new();
        if let Some(raw) = request.raw_headers() {
            for (name, value) in raw {
                xhr.set_request_header(name, value)?;
                seen.push(name.to_ascii_lowercase());
            }
        }
        for (name, value) in request.headers().iter() {
            if seen.iter().any(|s| s == name) {
                continue;
            }
            xhr.set_request_header(name, value)?;
        }

        if let Some(signal) = request.signal() {
            let weak = xhr.downgrade();
            let id = signal.add_listener(move || {
                if let Some(xhr) = weak.upgrade() {
                    xhr.abort();
                }
            });

            let signal = signal.clone();
            let weak = xhr.downgrade();
            let id = Cell::new(Some(id));
            xhr.add_event_listener(EventKind::ReadyStateChange, move |_| {
                let done = weak
                    .upgrade()
                    .map(|x| x.ready_state() == ReadyState::Done)
                    .unwrap_or(true);
                if done {
                    if let Some(id) = id.take() {
                        signal.remove_listener(id);
                    }
                }
            });
        }

        // The body is handed over one tick later, a signal firing in between
        // wins over sending.
        let weak = xhr.downgrade();
        let slot = slot.clone();
        let signal = request.signal().cloned();
        self.scheduler.defer(move || {
            let Some(xhr) = weak.upgrade() else {
                return;
            };
            if let Some(signal) = &signal {
                if let Err(e) = signal.throw_if_aborted() {
                    debug!("Signal fired before send");
                    settle(&slot, Err(e));
                    return;
                }
            }
            if let Err(e) = xhr.send_payload(payload) {
                settle(&slot, Err(e));
            }
        });

        Ok(xhr)
    }

    fn wire_outcomes(&self, xhr: &XmlHttpRequest, request: &Request, slot: &Rc<RefCell<Slot>>) {
        {
            let slot = slot.clone();
            let weak = xhr.downgrade();
            let scheduler = self.scheduler.clone();
            xhr.add_event_listener(EventKind::Load, move |_| {
                let slot = slot.clone();
                let weak = weak.clone();
                scheduler.defer(move || {
                    if let Some(xhr) = weak.upgrade() {
                        settle(&slot, build_response(&xhr));
                    }
                });
            });
        }
        {
            let slot = slot.clone();
            xhr.add_event_listener(EventKind::Error, move |_| {
                settle(&slot, Err(Error::Network(NETWORK_FAILED.to_string())));
            });
        }
        {
            let slot = slot.clone();
            xhr.add_event_listener(EventKind::Timeout, move |_| {
                settle(&slot, Err(Error::Timeout));
            });
        }
        {
            let slot = slot.clone();
            let signal = request.signal().cloned();
            xhr.add_event_listener(EventKind::Abort, move |_| {
                let reason = signal
                    .as_ref()
                    .and_then(|s| s.reason())
                    .unwrap_or_else(|| ABORTED.to_string());
                settle(&slot, Err(Error::Abort(reason)));
            });
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

fn build_response(xhr: &XmlHttpRequest) -> Result<Response, Error> {
    let headers = Headers::parse_raw(&xhr.get_all_response_headers());
    let bytes = match xhr.response() {
        Some(ResponseValue::Bytes(b)) => b,
        Some(ResponseValue::Text(s)) => s.into_bytes(),
        Some(ResponseValue::Blob(b)) => b.array_buffer(),
        Some(ResponseValue::Json(v)) => v.to_string().into_bytes(),
        None => Vec::new(),
    };
    Response::from_transport(
        xhr.status(),
        xhr.status_text(),
        headers,
        xhr.response_url(),
        bytes,
    )
}

#[derive(Default)]
struct Slot {
    result: Option<Result<Response, Error>>,
    settled: bool,
    waker: Option<Waker>,
}

/// Settle once, later outcomes are dropped.
fn settle(slot: &Rc<RefCell<Slot>>, result: Result<Response, Error>) {
    let waker = {
        let mut s = slot.borrow_mut();
        if s.settled {
            trace!("Drop outcome for settled fetch: {:?}", result.as_ref().err());
            return;
        }
        s.settled = true;
        s.result = Some(result);
        s.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}

/// The outcome of [`Client::fetch`].
pub struct ResponseFuture {
    slot: Rc<RefCell<Slot>>,
    xhr: Option<XmlHttpRequest>,
}

impl ResponseFuture {
    /// Tell if the exchange has an outcome.
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().settled
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut s = self.slot.borrow_mut();
        match s.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                s.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if self.is_settled() {
            return;
        }
        if let Some(xhr) = self.xhr.take() {
            debug!("Dropped unsettled fetch, abort");
            xhr.abort();
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("settled", &self.is_settled())
            .field("xhr", &self.xhr)
            .finish()
    }
}
