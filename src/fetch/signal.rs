use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::event::{Event, EventKind, EventTarget, ListenerId, Scope};
use crate::Error;

const DEFAULT_REASON: &str = "The operation was aborted.";

/// External cancellation signal.
///
/// Cloning gives another handle to the same signal.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    reason: RefCell<Option<String>>,
    events: EventTarget,
}

impl AbortSignal {
    /// A signal that is already aborted.
    pub fn aborted_with(reason: &str) -> Self {
        let signal = AbortSignal::default();
        signal.trigger(Some(reason));
        signal
    }

    /// Tell if the signal fired.
    pub fn aborted(&self) -> bool {
        self.inner.reason.borrow().is_some()
    }

    /// The reason given when aborting.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.borrow().clone()
    }

    /// Fail with [`Error::Abort`] if the signal fired.
    pub fn throw_if_aborted(&self) -> Result<(), Error> {
        match self.reason() {
            Some(reason) => Err(Error::Abort(reason)),
            None => Ok(()),
        }
    }

    /// Run `f` when the signal fires.
    pub fn add_listener(&self, f: impl Fn() + 'static) -> ListenerId {
        self.inner.events.add_listener(EventKind::Abort, move |_| f())
    }

    /// Stop listening.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    fn trigger(&self, reason: Option<&str>) {
        {
            let mut r = self.inner.reason.borrow_mut();
            if r.is_some() {
                return;
            }
            *r = Some(reason.unwrap_or(DEFAULT_REASON).to_string());
        }
        debug!("Abort signal: {:?}", self.reason());
        self.inner
            .events
            .dispatch(&Event::new(EventKind::Abort, Scope::Download));
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.inner.reason.borrow())
            .finish()
    }
}

/// Owner of an [`AbortSignal`].
#[derive(Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// New controller with an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// The controlled signal.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire the signal. Only the first call has an effect.
    pub fn abort(&self, reason: Option<&str>) {
        self.signal.trigger(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn abort_fires_once() {
        let c = AbortController::new();
        let count = Rc::new(Cell::new(0));
        let n = count.clone();
        c.signal().add_listener(move || n.set(n.get() + 1));

        assert!(!c.signal().aborted());
        c.abort(Some("stop"));
        c.abort(Some("again"));

        assert_eq!(count.get(), 1);
        assert_eq!(c.signal().reason().as_deref(), Some("stop"));
        assert_eq!(
            c.signal().throw_if_aborted(),
            Err(Error::Abort("stop".into()))
        );
    }

    #[test]
    fn default_reason() {
        let c = AbortController::new();
        c.abort(None);
        assert_eq!(c.signal().reason().as_deref(), Some(DEFAULT_REASON));
    }

    #[test]
    fn removed_listener_not_called() {
        let c = AbortController::new();
        let called = Rc::new(Cell::new(false));
        let f = called.clone();
        let id = c.signal().add_listener(move || f.set(true));
        assert!(c.signal().remove_listener(id));
        c.abort(None);
        assert!(!called.get());
    }

    #[test]
    fn pre_aborted() {
        let s = AbortSignal::aborted_with("early");
        assert!(s.aborted());
        assert!(s.throw_if_aborted().is_err());
    }
}
