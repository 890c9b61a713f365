//! The injected transport primitive.
//!
//! A transport starts a [`Task`] for a set of [`TransportOptions`] and reports
//! back through a [`Responder`]. The responder enforces the callback contract:
//!
//! * at most one of success/fail
//! * followed by exactly one complete
//!
//! Every callback is delivered on a later scheduler tick, never inline, so a
//! transport that answers synchronously still looks asynchronous to the caller.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::payload::Representation;
use crate::scheduler::Scheduler;

/// How the transport should hand over the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// UTF-8 text.
    #[default]
    Text,
    /// Raw bytes.
    ArrayBuffer,
}

/// What to send.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Target url, as given to `open()`.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Header lines in the order they were set.
    pub headers: Vec<(String, String)>,
    /// Body, never present for GET and HEAD.
    pub body: Option<Representation>,
    /// Wanted body format for the response.
    pub response_format: ResponseFormat,
    /// Send cookies and auth cross origin.
    pub with_credentials: bool,
}

/// A response with a valid HTTP envelope.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase, derived from the status when absent.
    pub status_text: Option<String>,
    /// Response header lines.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Representation,
    /// Final url after transport level redirects.
    pub url: Option<String>,
}

impl TransportResponse {
    /// A response with status and body, no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        TransportResponse {
            status,
            status_text: None,
            headers: Vec::new(),
            body: Representation::Text(body.into()),
            url: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A transport level failure.
///
/// Some platforms report HTTP error responses as failures. When `status` and
/// `headers` are both present the failure is treated as a response.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct TransportFailure {
    pub message: String,
    pub status: Option<u16>,
    pub headers: Option<Vec<(String, String)>>,
    pub body: Option<Representation>,
}

impl TransportFailure {
    /// A failure without any envelope.
    pub fn new(message: impl Into<String>) -> Self {
        TransportFailure {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Convert into a response if the failure carries a usable envelope.
    pub(crate) fn into_response(self) -> Result<TransportResponse, TransportFailure> {
        match (self.status, self.headers) {
            (Some(status), Some(headers)) => Ok(TransportResponse {
                status,
                status_text: None,
                headers,
                body: self
                    .body
                    .unwrap_or_else(|| Representation::Text(String::new())),
                url: None,
            }),
            (status, headers) => Err(TransportFailure {
                message: self.message,
                status,
                headers,
                body: self.body,
            }),
        }
    }
}

/// A started transport operation.
pub trait Task {
    /// Best effort cancellation. Must be safe to call after completion.
    fn abort(&self);
}

/// Callback outcome delivered from the transport.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success(TransportResponse),
    Fail(TransportFailure),
    Complete,
}

/// Handed to the transport to report the outcome of a task.
pub struct Responder {
    scheduler: Scheduler,
    sink: Rc<dyn Fn(Outcome)>,
    answered: Cell<bool>,
    completed: Cell<bool>,
}

impl Responder {
    pub(crate) fn new(scheduler: Scheduler, sink: Rc<dyn Fn(Outcome)>) -> Self {
        Responder {
            scheduler,
            sink,
            answered: Cell::new(false),
            completed: Cell::new(false),
        }
    }

    /// Report a response. Ignored after a previous success/fail.
    pub fn success(&self, response: TransportResponse) {
        if self.answer() {
            self.deliver(Outcome::Success(response));
        }
    }

    /// Report a failure. Ignored after a previous success/fail.
    pub fn fail(&self, failure: TransportFailure) {
        if self.answer() {
            self.deliver(Outcome::Fail(failure));
        }
    }

    /// Report that the task is over. Only the first call counts.
    pub fn complete(&self) {
        if !self.completed.replace(true) {
            self.deliver(Outcome::Complete);
        }
    }

    /// Shorthand for `success` followed by `complete`.
    pub fn respond(self, response: TransportResponse) {
        self.success(response);
        self.complete();
    }

    /// Shorthand for `fail` followed by `complete`.
    pub fn reject(self, failure: TransportFailure) {
        self.fail(failure);
        self.complete();
    }

    /// Tell if complete has been reported.
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    fn answer(&self) -> bool {
        if self.completed.get() || self.answered.replace(true) {
            trace!("Transport answered twice, ignoring");
            return false;
        }
        true
    }

    fn deliver(&self, outcome: Outcome) {
        let sink = self.sink.clone();
        self.scheduler.defer(move || sink(outcome));
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.completed.get() {
            return;
        }
        if !self.answered.get() {
            self.fail(TransportFailure::new("transport dropped the task"));
        }
        self.complete();
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("answered", &self.answered.get())
            .field("completed", &self.completed.get())
            .finish()
    }
}

/// Starts transport tasks.
pub trait Transport {
    /// Start a task. The responder must eventually be completed or dropped.
    fn start(&self, options: TransportOptions, responder: Responder) -> Box<dyn Task>;
}

impl<F> Transport for F
where
    F: Fn(TransportOptions, Responder) -> Box<dyn Task>,
{
    fn start(&self, options: TransportOptions, responder: Responder) -> Box<dyn Task> {
        self(options, responder)
    }
}

/// A task that can not be canceled.
#[derive(Debug, Default)]
pub struct NoAbort;

impl Task for NoAbort {
    fn abort(&self) {}
}

/// Prefer a host provided transport, falling back to `fallback`.
pub fn select(
    host: Option<Rc<dyn Transport>>,
    fallback: impl FnOnce() -> Rc<dyn Transport>,
) -> Rc<dyn Transport> {
    match host {
        Some(t) => {
            debug!("Using host transport");
            t
        }
        None => {
            debug!("Using fallback transport");
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn sink() -> (Rc<RefCell<Vec<String>>>, Rc<dyn Fn(Outcome)>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let f: Rc<dyn Fn(Outcome)> = Rc::new(move |o: Outcome| {
            let name = match o {
                Outcome::Success(r) => format!("success {}", r.status),
                Outcome::Fail(f) => format!("fail {}", f.message),
                Outcome::Complete => "complete".to_string(),
            };
            s.borrow_mut().push(name);
        });
        (seen, f)
    }

    #[test]
    fn delivery_is_deferred() {
        let scheduler = Scheduler::new();
        let (seen, f) = sink();
        let r = Responder::new(scheduler.clone(), f);
        r.respond(TransportResponse::new(200, "ok"));
        assert!(seen.borrow().is_empty());
        scheduler.run_until_idle();
        assert_eq!(*seen.borrow(), ["success 200", "complete"]);
    }

    #[test]
    fn only_first_answer_counts() {
        let scheduler = Scheduler::new();
        let (seen, f) = sink();
        let r = Responder::new(scheduler.clone(), f);
        r.fail(TransportFailure::new("boom"));
        r.success(TransportResponse::new(200, ""));
        r.complete();
        r.complete();
        r.fail(TransportFailure::new("late"));
        scheduler.run_until_idle();
        assert_eq!(*seen.borrow(), ["fail boom", "complete"]);
    }

    #[test]
    fn drop_completes() {
        let scheduler = Scheduler::new();
        let (seen, f) = sink();
        drop(Responder::new(scheduler.clone(), f));
        scheduler.run_until_idle();
        assert_eq!(
            *seen.borrow(),
            ["fail transport dropped the task", "complete"]
        );
    }

    #[test]
    fn failure_with_envelope_is_response() {
        let f = TransportFailure {
            message: "http error".into(),
            status: Some(500),
            headers: Some(vec![]),
            body: None,
        };
        assert_eq!(f.into_response().unwrap().status, 500);

        let f = TransportFailure {
            status: Some(500),
            ..TransportFailure::new("no headers")
        };
        assert!(f.into_response().is_err());
    }

    #[test]
    fn closure_is_transport() {
        let scheduler = Scheduler::new();
        let t = |_o: TransportOptions, r: Responder| -> Box<dyn Task> {
            r.respond(TransportResponse::new(204, ""));
            Box::new(NoAbort)
        };
        let chosen = select(None, move || Rc::new(t) as Rc<dyn Transport>);
        let (seen, f) = sink();
        let task = chosen.start(
            TransportOptions {
                url: "http://x.test".into(),
                method: "GET".into(),
                headers: vec![],
                body: None,
                response_format: ResponseFormat::Text,
                with_credentials: false,
            },
            Responder::new(scheduler.clone(), f),
        );
        task.abort();
        scheduler.run_until_idle();
        assert_eq!(*seen.borrow(), ["success 204", "complete"]);
    }
}
