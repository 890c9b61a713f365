#![no_main]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use xhr_fetch::event::EventKind;
use xhr_fetch::scheduler::Scheduler;
use xhr_fetch::transport::{NoAbort, Responder, Task, TransportFailure};
use xhr_fetch::transport::{TransportOptions, TransportResponse};
use xhr_fetch::xhr::{ReadyState, XmlHttpRequest};

const METHODS: &[&str] = &["GET", "POST", "put", "HEAD", "PATCH"];

// Every event kind the request object emits.
const KINDS: &[EventKind] = &[
    EventKind::LoadStart,
    EventKind::Load,
    EventKind::Error,
    EventKind::Timeout,
    EventKind::Abort,
    EventKind::LoadEnd,
];

fuzz_target!(|data: &[u8]| {
    let scheduler = Scheduler::new();
    let held: Rc<RefCell<Vec<Responder>>> = Rc::default();

    let h = held.clone();
    let transport = move |_: TransportOptions, responder: Responder| -> Box<dyn Task> {
        h.borrow_mut().push(responder);
        Box::new(NoAbort)
    };

    let xhr = XmlHttpRequest::new(scheduler.clone(), Rc::new(transport));

    let log: Rc<RefCell<Vec<EventKind>>> = Rc::default();
    for kind in KINDS {
        let l = log.clone();
        xhr.add_event_listener(*kind, move |e| l.borrow_mut().push(e.kind));
    }

    // Every two bytes is one operation and its argument.
    for op in data.chunks(2) {
        let arg = op.get(1).copied().unwrap_or(0);

        match op[0] % 12 {
            0 => {
                let method = METHODS[arg as usize % METHODS.len()];
                let _ = xhr.open(method, "http://fuzz.test/");
            }
            1 => {
                let body = (arg % 2 == 0).then(|| "body".into());
                let _ = xhr.send(body);
            }
            2 => xhr.abort(),
            3 => xhr.set_timeout(Duration::from_millis(arg as u64)),
            4 => {
                let _ = xhr.set_request_header("x-fuzz", "1");
            }
            5 => {
                let r = held.borrow_mut().pop();
                if let Some(r) = r {
                    r.respond(TransportResponse::new(200 + arg as u16, "ok"));
                }
            }
            6 => {
                let r = held.borrow_mut().pop();
                if let Some(r) = r {
                    r.reject(TransportFailure::new("fuzz"));
                }
            }
            7 => {
                // Dropping the responder fails and completes the task.
                let r = held.borrow_mut().pop();
                drop(r);
            }
            8 => {
                scheduler.tick();
            }
            9 => {
                // Success now, complete in a later operation.
                if let Some(r) = held.borrow().last() {
                    r.success(TransportResponse::new(200 + arg as u16, "ok"));
                }
            }
            10 => {
                let r = held.borrow_mut().pop();
                if let Some(r) = r {
                    r.complete();
                }
            }
            _ => scheduler.advance(Duration::from_millis(arg as u64)),
        }
    }

    held.borrow_mut().clear();
    scheduler.run();

    // Each terminal outcome belongs to a started exchange.
    let log = log.borrow();
    let starts = log.iter().filter(|k| **k == EventKind::LoadStart).count();
    let terminals = log.iter().filter(|k| k.is_terminal()).count();
    let ends = log.iter().filter(|k| **k == EventKind::LoadEnd).count();
    assert!(terminals <= starts, "{:?}", log);
    assert!(ends <= starts, "{:?}", log);

    let state = xhr.ready_state();
    assert!(state <= ReadyState::Done);
});
