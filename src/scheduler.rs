//! Single threaded cooperative scheduler.
//!
//! Every state transition in this crate runs synchronously inside one job. Concurrency
//! only comes from the interleaving of independently queued jobs:
//!
//! * transport callbacks (success, fail, complete)
//! * timers (request timeouts)
//! * explicit one-tick deferrals via [`Scheduler::defer`]
//!
//! Time is virtual. Timers fire when the clock is moved forward with
//! [`Scheduler::advance`], or when [`Scheduler::run`]/[`Scheduler::block_on`] run
//! out of ready jobs and jump to the next deadline.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

type Job = Box<dyn FnOnce()>;

/// Handle to cancel a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId {
    deadline: u64,
    seq: u64,
}

/// Cheaply cloneable handle to a shared job queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    queue: Rc<RefCell<Queue>>,
}

#[derive(Default)]
struct Queue {
    now: u64,
    seq: u64,
    ready: VecDeque<Job>,
    timers: BTreeMap<TimerId, Job>,
}

impl Scheduler {
    /// Create a new scheduler with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.queue.borrow().now)
    }

    /// Yield to the scheduler, running `job` on the next tick.
    pub fn defer(&self, job: impl FnOnce() + 'static) {
        self.queue.borrow_mut().ready.push_back(Box::new(job));
    }

    /// Run `job` once `after` has elapsed on the virtual clock.
    pub fn set_timeout(&self, after: Duration, job: impl FnOnce() + 'static) -> TimerId {
        let mut q = self.queue.borrow_mut();
        q.seq += 1;
        let id = TimerId {
            deadline: q.now.saturating_add(after.as_millis() as u64),
            seq: q.seq,
        };
        q.timers.insert(id, Box::new(job));
        id
    }

    /// Cancel a timer. Returns `false` if it already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        // Dropped outside the borrow, the job may own things that schedule on drop.
        let job = self.queue.borrow_mut().timers.remove(&id);
        job.is_some()
    }

    /// Number of ready jobs plus pending timers.
    pub fn pending(&self) -> usize {
        let q = self.queue.borrow();
        q.ready.len() + q.timers.len()
    }

    /// Run a single ready job. Returns `false` if there was nothing to run.
    pub fn tick(&self) -> bool {
        // The borrow must end before the job runs, jobs schedule more jobs.
        let job = self.queue.borrow_mut().ready.pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run ready jobs until the queue is empty. Timers are not fired.
    pub fn run_until_idle(&self) -> usize {
        let mut n = 0;
        while self.tick() {
            n += 1;
        }
        n
    }

    /// Move the clock forward, firing every timer that falls due in order.
    pub fn advance(&self, by: Duration) {
        self.run_until_idle();

        let target = self.queue.borrow().now.saturating_add(by.as_millis() as u64);

        while self.fire_next_timer(Some(target)) {
            self.run_until_idle();
        }

        self.queue.borrow_mut().now = target;
    }

    /// Run until there are no ready jobs and no timers left.
    pub fn run(&self) {
        loop {
            self.run_until_idle();
            if !self.fire_next_timer(None) {
                break;
            }
        }
    }

    /// Drive `fut` to completion on this scheduler.
    ///
    /// Returns `None` if the future is still pending once there are no more jobs
    /// or timers that could make progress.
    pub fn block_on<F: Future>(&self, fut: F) -> Option<F::Output> {
        let mut fut = pin!(fut);
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);

        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return Some(v);
            }

            if self.tick() {
                continue;
            }

            if !self.fire_next_timer(None) {
                trace!("block_on stalled at {}ms", self.queue.borrow().now);
                return None;
            }
        }
    }

    fn fire_next_timer(&self, until: Option<u64>) -> bool {
        let job = {
            let mut q = self.queue.borrow_mut();
            let Some(id) = q.timers.keys().next().copied() else {
                return false;
            };
            if until.map(|u| id.deadline > u).unwrap_or(false) {
                return false;
            }
            q.now = q.now.max(id.deadline);
            q.timers.remove(&id)
        };

        if let Some(job) = job {
            job();
        }
        true
    }
}

// Polling is driven by the job loop, so wakeups carry no information.
struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.queue.borrow();
        f.debug_struct("Scheduler")
            .field("now", &q.now)
            .field("ready", &q.ready.len())
            .field("timers", &q.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let make = move |s: &'static str| {
            let l = l.clone();
            Box::new(move || l.borrow_mut().push(s)) as Box<dyn FnOnce()>
        };
        (log, make)
    }

    #[test]
    fn defer_runs_in_order() {
        let s = Scheduler::new();
        let (log, make) = recorder();
        s.defer(make("a"));
        s.defer(make("b"));
        assert!(log.borrow().is_empty());
        assert_eq!(s.run_until_idle(), 2);
        assert_eq!(*log.borrow(), ["a", "b"]);
    }

    #[test]
    fn deferred_job_can_defer() {
        let s = Scheduler::new();
        let (log, make) = recorder();
        let s2 = s.clone();
        let inner = make("inner");
        s.defer(move || s2.defer(inner));
        s.defer(make("outer"));
        s.run_until_idle();
        assert_eq!(*log.borrow(), ["outer", "inner"]);
    }

    #[test]
    fn timers_fire_by_deadline() {
        let s = Scheduler::new();
        let (log, make) = recorder();
        s.set_timeout(Duration::from_millis(20), make("late"));
        s.set_timeout(Duration::from_millis(10), make("early"));

        s.advance(Duration::from_millis(5));
        assert!(log.borrow().is_empty());

        s.advance(Duration::from_millis(10));
        assert_eq!(*log.borrow(), ["early"]);
        assert_eq!(s.now(), Duration::from_millis(15));

        s.advance(Duration::from_millis(10));
        assert_eq!(*log.borrow(), ["early", "late"]);
    }

    #[test]
    fn cleared_timer_does_not_fire() {
        let s = Scheduler::new();
        let (log, make) = recorder();
        let id = s.set_timeout(Duration::from_millis(10), make("x"));
        assert!(s.clear_timeout(id));
        assert!(!s.clear_timeout(id));
        s.run();
        assert!(log.borrow().is_empty());
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn block_on_ready_future() {
        let s = Scheduler::new();
        assert_eq!(s.block_on(async { 42 }), Some(42));
    }

    #[test]
    fn block_on_stalls_without_jobs() {
        let s = Scheduler::new();
        let r = s.block_on(std::future::pending::<()>());
        assert!(r.is_none());
    }
}
