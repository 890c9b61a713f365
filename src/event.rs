//! Event bus capability composed into lifecycle objects.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Kinds of events emitted during a request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The ready state changed.
    ReadyStateChange,
    /// The exchange started.
    LoadStart,
    /// Body bytes were transferred.
    Progress,
    /// The exchange succeeded.
    Load,
    /// The exchange failed without a usable response.
    Error,
    /// The configured timeout elapsed first.
    Timeout,
    /// The exchange was aborted.
    Abort,
    /// The exchange ended, whatever the outcome.
    LoadEnd,
}

impl EventKind {
    /// The DOM event name, i.e. `"readystatechange"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReadyStateChange => "readystatechange",
            EventKind::LoadStart => "loadstart",
            EventKind::Progress => "progress",
            EventKind::Load => "load",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
            EventKind::Abort => "abort",
            EventKind::LoadEnd => "loadend",
        }
    }

    /// Tell if this is one of the mutually exclusive outcomes of an exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Load | EventKind::Error | EventKind::Timeout | EventKind::Abort
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the exchange an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The response side, dispatched on the request object itself.
    Download,
    /// The request body upload.
    Upload,
}

/// An event with progress information.
///
/// `readystatechange` carries zero progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Which target the event belongs to.
    pub scope: Scope,
    /// Bytes transferred so far.
    pub loaded: u64,
    /// Expected bytes, 0 if unknown.
    pub total: u64,
    /// Whether `total` is known.
    pub length_computable: bool,
}

impl Event {
    pub(crate) fn new(kind: EventKind, scope: Scope) -> Self {
        Event {
            kind,
            scope,
            loaded: 0,
            total: 0,
            length_computable: false,
        }
    }

    pub(crate) fn progress(kind: EventKind, scope: Scope, loaded: u64, total: u64) -> Self {
        Event {
            kind,
            scope,
            loaded,
            total,
            length_computable: total > 0,
        }
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&Event)>;

/// A minimal event dispatcher.
#[derive(Default)]
pub struct EventTarget {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, EventKind, Listener)>>,
}

impl EventTarget {
    /// Create a target without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` for events of `kind`.
    pub fn add_listener(&self, kind: EventKind, f: impl Fn(&Event) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, kind, Rc::new(f)));
        id
    }

    /// Unregister. Returns whether the listener was present.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(i, _, _)| *i != id);
        listeners.len() != before
    }

    /// Invoke every listener registered for the event kind.
    ///
    /// Listeners are snapshotted first, so they may add or remove listeners
    /// (or re-enter the owning object) while being called.
    pub fn dispatch(&self, event: &Event) {
        let matching: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, k, _)| *k == event.kind)
            .map(|(_, _, f)| f.clone())
            .collect();

        for f in matching {
            f(event);
        }
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}
