//! Transport callbacks, timers and deferred continuations of one exchange.

use std::rc::{Rc, Weak};

use crate::event::{Event, EventKind, Scope};
use crate::ext::MethodExt;
use crate::headers::Headers;
use crate::payload::Payload;
use crate::transport::{
    Outcome, ResponseFormat, Responder, TransportFailure, TransportOptions, TransportResponse,
};
use crate::Error;

use super::{decode_response, ReadyState, ResponseType, Shared};

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.state.borrow().generation == generation
    }

    fn dispatch(&self, event: Event) {
        match event.scope {
            Scope::Download => self.events.dispatch(&event),
            Scope::Upload => self.upload.dispatch(&event),
        }
    }

    /// Move to `next`, firing `readystatechange` if it differs.
    ///
    /// Returns whether the exchange is still current once listeners have run.
    pub(super) fn change_state(&self, generation: u64, next: ReadyState) -> bool {
        let changed = {
            let mut st = self.state.borrow_mut();
            if st.generation != generation {
                return false;
            }
            let prev = st.ready_state;
            st.ready_state = next;
            if prev != next {
                debug!("{:?} -> {:?}", prev, next);
            }
            prev != next
        };

        if changed {
            self.dispatch(Event::new(EventKind::ReadyStateChange, Scope::Download));
        }

        self.is_current(generation)
    }

    fn clear_timer(&self) {
        let timer = self.state.borrow_mut().timer.take();
        if let Some(timer) = timer {
            self.scheduler.clear_timeout(timer);
        }
    }

    fn defer(self: &Rc<Self>, f: impl FnOnce(&Rc<Shared>) + 'static) {
        let weak = Rc::downgrade(self);
        self.scheduler.defer(move || {
            if let Some(shared) = weak.upgrade() {
                f(&shared);
            }
        });
    }

    pub(super) fn send(self: &Rc<Self>, payload: Option<Rc<Payload>>) -> Result<(), Error> {
        let (generation, options, timeout, upload_total) = {
            let mut st = self.state.borrow_mut();

            if st.ready_state != ReadyState::Opened || !st.armed {
                return Err(Error::InvalidState("send() requires OPENED"));
            }

            let payload = payload.filter(|_| st.method.allows_body());

            if let Some(p) = &payload {
                let hint = p.content_type_hint();
                if !hint.is_empty() && !st.request_headers.has("content-type") {
                    st.request_headers.set("content-type", hint)?;
                }
            }

            st.armed = false;
            st.sent = true;
            st.upload_total = payload
                .as_ref()
                .map(|p| p.byte_length() as u64)
                .filter(|n| *n > 0);

            let response_format = match st.response_type {
                ResponseType::ArrayBuffer | ResponseType::Blob => ResponseFormat::ArrayBuffer,
                ResponseType::Text | ResponseType::Json => ResponseFormat::Text,
            };

            let options = TransportOptions {
                url: st.url.clone(),
                method: st.method.clone(),
                headers: st
                    .request_headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: payload.map(|p| p.representation().clone()),
                response_format,
                with_credentials: st.with_credentials,
            };

            (st.generation, options, st.timeout, st.upload_total)
        };

        debug!("send {} {}", options.method, options.url);

        let weak: Weak<Shared> = Rc::downgrade(self);
        let responder = Responder::new(
            self.scheduler.clone(),
            Rc::new(move |outcome: Outcome| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_outcome(generation, outcome);
                }
            }),
        );

        let task = self.transport.start(options, responder);

        {
            let mut st = self.state.borrow_mut();
            if st.generation == generation {
                st.task = Some(task);
            }
        }

        self.dispatch(Event::progress(EventKind::LoadStart, Scope::Download, 0, 0));
        if !self.is_current(generation) {
            return Ok(());
        }

        if let Some(total) = upload_total {
            self.dispatch(Event::progress(EventKind::LoadStart, Scope::Upload, 0, total));
            if !self.is_current(generation) {
                return Ok(());
            }
        }

        if !timeout.is_zero() {
            let weak = Rc::downgrade(self);
            let timer = self.scheduler.set_timeout(timeout, move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_timeout(generation);
                }
            });
            self.state.borrow_mut().timer = Some(timer);
        }

        Ok(())
    }

    pub(super) fn abort(self: &Rc<Self>) {
        let (generation, task, upload_total, in_flight) = {
            let mut st = self.state.borrow_mut();

            if st.reset_pending {
                trace!("abort() while reset is pending");
                return;
            }

            // After load or error the exchange only waits for complete.
            let in_flight = st.sent && !st.ended && !st.errored && !st.loaded;
            let unsent_open = st.ready_state == ReadyState::Opened && st.armed;

            if !in_flight && !unsent_open {
                trace!("abort() with nothing to abort in {:?}", st.ready_state);
                return;
            }

            st.generation += 1;
            st.reset_pending = true;
            st.armed = false;

            if in_flight {
                st.ended = true;
                st.status = 0;
                st.status_text.clear();
                st.response = None;
            }

            (st.generation, st.task.take(), st.upload_total, in_flight)
        };

        self.clear_timer();

        if !in_flight {
            debug!("abort() before send");
            self.defer(move |s| s.reset(generation));
            return;
        }

        debug!("abort()");
        self.change_state(generation, ReadyState::Done);

        // The task is stopped even if the request object is gone by then.
        let weak = Rc::downgrade(self);
        self.scheduler.defer(move || {
            if let Some(task) = task {
                task.abort();
            }
            let Some(s) = weak.upgrade() else {
                return;
            };

            {
                let st = s.state.borrow();
                if !st.reset_pending || st.generation != generation {
                    trace!("Suppress abort events, superseded by open()");
                    return;
                }
            }

            s.dispatch(Event::new(EventKind::Abort, Scope::Download));
            if upload_total.is_some() {
                s.dispatch(Event::new(EventKind::Abort, Scope::Upload));
                s.dispatch(Event::new(EventKind::LoadEnd, Scope::Upload));
            }
            s.dispatch(Event::new(EventKind::LoadEnd, Scope::Download));

            s.defer(move |s| s.reset(generation));
        });
    }

    fn reset(&self, generation: u64) {
        let mut st = self.state.borrow_mut();
        if !st.reset_pending || st.generation != generation {
            trace!("Skip reset, superseded by open()");
            return;
        }
        st.reset_pending = false;
        st.ready_state = ReadyState::Unsent;
        st.request_headers = Headers::new();
        st.clear_response();
        st.sent = false;
        st.upload_total = None;
        debug!("Reset to {:?}", st.ready_state);
    }

    fn on_outcome(self: &Rc<Self>, generation: u64, outcome: Outcome) {
        if !self.is_current(generation) {
            trace!("Suppress stale transport callback: {:?}", outcome);
            return;
        }

        match outcome {
            Outcome::Success(r) => self.on_success(generation, r),
            Outcome::Fail(f) => match f.into_response() {
                Ok(r) => {
                    debug!("Failure with HTTP envelope, status {}", r.status);
                    self.on_success(generation, r);
                }
                Err(f) => self.on_fail(generation, f),
            },
            Outcome::Complete => self.on_complete(generation),
        }
    }

    fn on_success(self: &Rc<Self>, generation: u64, r: TransportResponse) {
        {
            let mut st = self.state.borrow_mut();
            if st.ready_state != ReadyState::Opened {
                trace!("Ignore response in {:?}", st.ready_state);
                return;
            }

            let mut headers = Headers::new();
            for (k, v) in &r.headers {
                if let Err(e) = headers.append(k, v) {
                    warn!("Drop response header {:?}: {}", k, e);
                }
            }

            st.status = r.status;
            st.status_text = r.status_text.clone().unwrap_or_else(|| {
                http::StatusCode::from_u16(r.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("")
                    .to_string()
            });
            let url = r.url.clone().unwrap_or_else(|| st.url.clone());
            st.response_headers = Some(headers);
            st.response_url = url;
            st.raw_body = Some(r.body);
        }

        if !self.change_state(generation, ReadyState::HeadersReceived) {
            return;
        }
        if !self.change_state(generation, ReadyState::Loading) {
            return;
        }

        // Let header and state listeners settle before the body materializes.
        self.defer(move |s| s.finish_load(generation));
    }

    fn finish_load(&self, generation: u64) {
        let (result, total) = {
            let mut st = self.state.borrow_mut();
            if st.generation != generation || st.reset_pending {
                trace!("Suppress stale body decode");
                return;
            }

            let content_type = st.response_content_type();
            let result = match &st.raw_body {
                Some(raw) => decode_response(raw, st.response_type, &content_type),
                None => Err(Error::Network("response without body".into())),
            };

            match result {
                Ok(v) => {
                    st.response = Some(v);
                    st.loaded = true;
                    (Ok(()), st.content_length())
                }
                Err(e) => {
                    st.errored = true;
                    (Err(e), 0)
                }
            }
        };

        self.clear_timer();

        match result {
            Ok(()) => {
                self.dispatch(Event::progress(EventKind::Progress, Scope::Download, total, total));
                if self.is_current(generation) {
                    self.dispatch(Event::progress(EventKind::Load, Scope::Download, total, total));
                }
            }
            Err(e) => {
                warn!("Failed to decode response: {}", e);
                self.dispatch(Event::new(EventKind::Error, Scope::Download));
            }
        }
    }

    fn on_fail(&self, generation: u64, f: TransportFailure) {
        {
            let mut st = self.state.borrow_mut();
            if st.reset_pending || st.ready_state == ReadyState::Done {
                trace!("Failure after the exchange ended: {}", f.message);
                return;
            }

            debug!("Transport failed: {}", f.message);
            st.status = 0;
            st.status_text = f.message;
            st.errored = true;
        }

        self.clear_timer();

        if self.is_current(generation) {
            self.dispatch(Event::new(EventKind::Error, Scope::Download));
        }
    }

    fn on_complete(self: &Rc<Self>, generation: u64) {
        let (need_done, task) = {
            let mut st = self.state.borrow_mut();
            let need_done = matches!(st.ready_state, ReadyState::Opened | ReadyState::Loading);
            (need_done, st.task.take())
        };
        drop(task);

        if need_done && !self.change_state(generation, ReadyState::Done) {
            return;
        }

        {
            let mut st = self.state.borrow_mut();
            if st.ended {
                return;
            }
            st.ended = true;
        }

        self.clear_timer();

        self.defer(move |s| s.emit_loadend(generation));
    }

    fn emit_loadend(&self, generation: u64) {
        let (total, errored, upload_total) = {
            let st = self.state.borrow();
            if st.generation != generation {
                trace!("Suppress stale loadend");
                return;
            }
            let total = if st.errored { 0 } else { st.content_length() };
            (total, st.errored, st.upload_total)
        };

        if let Some(up) = upload_total {
            let kind = if errored {
                EventKind::Error
            } else {
                EventKind::Load
            };
            self.dispatch(Event::progress(kind, Scope::Upload, up, up));
            self.dispatch(Event::progress(EventKind::LoadEnd, Scope::Upload, up, up));
        }

        self.dispatch(Event::progress(EventKind::LoadEnd, Scope::Download, total, total));
    }

    fn on_timeout(&self, generation: u64) {
        let (task, upload_total) = {
            let mut st = self.state.borrow_mut();
            st.timer = None;

            if st.generation != generation
                || st.status != 0
                || st.ended
                || st.ready_state == ReadyState::Done
            {
                trace!("Timer fired after the exchange settled");
                return;
            }

            st.ended = true;
            (st.task.take(), st.upload_total)
        };

        debug!("Timed out");

        if let Some(task) = task {
            task.abort();
        }

        if !self.change_state(generation, ReadyState::Done) {
            return;
        }

        self.dispatch(Event::new(EventKind::Timeout, Scope::Download));
        if upload_total.is_some() {
            self.dispatch(Event::new(EventKind::Timeout, Scope::Upload));
            self.dispatch(Event::new(EventKind::LoadEnd, Scope::Upload));
        }
        self.dispatch(Event::new(EventKind::LoadEnd, Scope::Download));
    }
}
