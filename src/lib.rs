//! Request lifecycle and fetch style client over an injected transport.
//!
//! The crate does no I/O of its own. A [`Transport`](transport::Transport) is handed
//! to the lifecycle object and starts a task per exchange, reporting back through a
//! [`Responder`](transport::Responder). Everything runs on a single threaded
//! [`Scheduler`](scheduler::Scheduler) with a virtual clock, which makes the whole
//! request lifecycle deterministic in tests.
//!
//! * [`xhr::XmlHttpRequest`] is the callback and event based lifecycle state machine.
//! * [`fetch::Client`] wraps it into one future per request, with
//!   [`fetch::Request`], [`fetch::Response`] and [`fetch::AbortController`].
//! * [`headers::Headers`], [`form::FormData`], [`params::UrlSearchParams`] and
//!   [`blob::Blob`] are the value types bodies are built from.
//!
//! ```
//! use std::rc::Rc;
//! use xhr_fetch::fetch::{Client, Request, RequestInit};
//! use xhr_fetch::scheduler::Scheduler;
//! use xhr_fetch::transport::{NoAbort, Responder, Task, TransportOptions, TransportResponse};
//!
//! let transport = |opts: TransportOptions, responder: Responder| -> Box<dyn Task> {
//!     responder.respond(TransportResponse::new(200, format!("hello {}", opts.url)));
//!     Box::new(NoAbort)
//! };
//!
//! let scheduler = Scheduler::new();
//! let client = Client::new(scheduler.clone(), Rc::new(transport));
//!
//! let request = Request::new("http://x.test/", RequestInit::default()).unwrap();
//! let response = scheduler.block_on(client.fetch(request)).unwrap().unwrap();
//! assert_eq!(response.status(), 200);
//!
//! let text = scheduler.block_on(response.text()).unwrap().unwrap();
//! assert_eq!(text, "hello http://x.test/");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;

#[cfg(feature = "fetch")]
mod body;
mod error;
mod ext;

pub mod blob;
pub mod event;
pub mod form;
pub mod headers;
pub mod params;
pub mod payload;
pub mod scheduler;
pub mod transport;
pub mod xhr;

#[cfg(feature = "fetch")]
pub mod fetch;

pub use error::Error;

// Re-export the basis for this crate.
pub use http;

#[cfg(test)]
mod test;
