// implements the simulation kernel: a queue of callbacks with discrete delays

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::{Rc, Weak};
use std::time::Duration;

use asynchronix::time::MonotonicTime;

use crate::error::SimError;

pub type Action = Box<dyn FnOnce() -> Result<(), SimError>>;

/*
    The queue never decrements delays. An event is keyed by the absolute time
    `t` at which it fires and by `ord`, a monotonically increasing counter that
    keeps events of the same timestamp in the order they were scheduled. The
    heap only holds keys, the actions wait in `actions` under their `ord`.
 */

#[derive(Default)]
struct DelayedQ {
    q: BinaryHeap<Reverse<(Duration, u64)>>,
    actions: HashMap<u64, Action>,
    time: Duration,
    ord_ctr: u64,
    dispatched: u64,
}

impl DelayedQ {
    fn next_time(&self) -> Option<Duration> {
        self.q.peek().map(|Reverse((t, _))| *t)
    }

    fn pop(&mut self) -> Option<Action> {
        let Reverse((t, ord)) = self.q.pop()?;
        self.time = t;
        self.dispatched += 1;
        self.actions.remove(&ord)
    }
}

/// Cooperative single-threaded scheduler. Exactly one callback runs at a
/// time; cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    q: Rc<RefCell<DelayedQ>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> MonotonicTime {
        MonotonicTime::EPOCH + self.elapsed()
    }
    /// simulated time since the start of the run
    pub fn elapsed(&self) -> Duration {
        self.q.borrow().time
    }
    pub fn pending(&self) -> usize {
        self.q.borrow().q.len()
    }
    pub fn dispatched(&self) -> u64 {
        self.q.borrow().dispatched
    }

    /// Queues `action` to run `delay` after the current time.
    pub fn schedule_in<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() -> Result<(), SimError> + 'static,
    {
        let mut q = self.q.borrow_mut();
        let t = q.time + delay;
        let ord = q.ord_ctr;
        q.ord_ctr += 1;
        q.q.push(Reverse((t, ord)));
        q.actions.insert(ord, Box::new(action));
    }

    /// Runs the earliest event. Returns `false` once the queue is empty.
    pub fn step(&self) -> Result<bool, SimError> {
        // the queue must not stay borrowed while the action runs
        let action = self.q.borrow_mut().pop();
        match action {
            Some(action) => {
                action()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn run(&self) -> Result<(), SimError> {
        while self.step()? {}
        Ok(())
    }

    /// Runs every event due at or before `deadline`.
    pub fn run_until(&self, deadline: MonotonicTime) -> Result<(), SimError> {
        loop {
            let next = self.q.borrow().next_time();
            match next {
                Some(t) if MonotonicTime::EPOCH + t <= deadline => { self.step()?; }
                _ => return Ok(()),
            }
        }
    }
}

/// A model's handle on the scheduler, used to deliver events to itself
/// after a delay (the payload event queue of the model).
pub struct Context<M> {
    model: Weak<RefCell<M>>,
    scheduler: Scheduler,
}

impl<M> Clone for Context<M> {
    fn clone(&self) -> Self {
        Context { model: self.model.clone(), scheduler: self.scheduler.clone() }
    }
}

impl<M: 'static> Context<M> {
    pub fn new(model: Weak<RefCell<M>>, scheduler: Scheduler) -> Self {
        Context { model, scheduler }
    }
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
    pub fn elapsed(&self) -> Duration {
        self.scheduler.elapsed()
    }

    /// Calls `func(model, arg)` after `delay`. Events addressed to a model
    /// that has been dropped in the meantime are discarded.
    pub fn schedule_event<T: 'static>(
        &self,
        delay: Duration,
        func: fn(&mut M, T) -> Result<(), SimError>,
        arg: T,
    ) {
        let model = self.model.clone();
        self.scheduler.schedule_in(delay, move || match model.upgrade() {
            Some(model) => func(&mut *model.borrow_mut(), arg),
            None => Ok(()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_time_events_keep_scheduling_order() {
        let sched = Scheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(5, 'a'), (0, 'b'), (5, 'c'), (0, 'd'), (3, 'e')] {
            let seen = seen.clone();
            sched.schedule_in(Duration::from_nanos(delay), move || {
                seen.borrow_mut().push(tag);
                Ok(())
            });
        }
        sched.run().unwrap();
        assert_eq!(*seen.borrow(), vec!['b', 'd', 'e', 'a', 'c']);
        assert_eq!(sched.elapsed(), Duration::from_nanos(5));
        assert_eq!(sched.dispatched(), 5);
    }

    #[test]
    fn delays_are_relative_to_the_current_time() {
        let sched = Scheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s, log) = (sched.clone(), seen.clone());
        sched.schedule_in(Duration::from_nanos(10), move || {
            let log2 = log.clone();
            let s2 = s.clone();
            s.schedule_in(Duration::from_nanos(4), move || {
                log2.borrow_mut().push(s2.elapsed());
                Ok(())
            });
            Ok(())
        });
        sched.run().unwrap();
        assert_eq!(*seen.borrow(), vec![Duration::from_nanos(14)]);
    }

    #[test]
    fn first_error_stops_the_run() {
        use crate::error::{PoolError, SimError};
        use crate::pool::TransactionPool;

        let tx = TransactionPool::new().allocate();
        let sched = Scheduler::new();
        sched.schedule_in(Duration::from_nanos(1), move || Err(PoolError::Underflow(tx).into()));
        sched.schedule_in(Duration::from_nanos(2), || Ok(()));

        assert_eq!(sched.run(), Err(SimError::Pool(PoolError::Underflow(tx))));
        assert_eq!(sched.pending(), 1);
    }

    #[test]
    fn run_until_leaves_later_events_queued() {
        let sched = Scheduler::new();
        sched.schedule_in(Duration::from_nanos(10), || Ok(()));
        sched.schedule_in(Duration::from_nanos(30), || Ok(()));
        sched.run_until(MonotonicTime::EPOCH + Duration::from_nanos(20)).unwrap();
        assert_eq!(sched.dispatched(), 1);
        assert_eq!(sched.pending(), 1);
    }
}
