//! Wake plumbing for the executor.
//!
//! Every task owns a [`UnitWaker`]. Waking it queues the task id on the
//! runtime's ready channel and unparks the executor thread, so wakers may be
//! fired from any thread.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

use futures::channel::mpsc::UnboundedSender;
use futures::task::ArcWake;

use crate::unit::UnitId;

pub(crate) struct ThreadNotify {
    /// The (single) executor thread.
    thread: Thread,
    /// A flag to ensure a wakeup (i.e. `unpark()`) is not "forgotten"
    /// before the next `park()`, which may otherwise happen if the code
    /// being executed as part of the future(s) being polled makes use of
    /// park / unpark calls of its own, i.e. we cannot assume that no other
    /// code uses park / unpark on the executing `thread`.
    unparked: AtomicBool,
    ready: UnboundedSender<UnitId>,
}

impl ThreadNotify {
    pub(crate) fn new(ready: UnboundedSender<UnitId>) -> Self {
        ThreadNotify {
            thread: thread::current(),
            unparked: AtomicBool::new(false),
            ready,
        }
    }

    pub(crate) fn unparked(&self) -> &AtomicBool {
        &self.unparked
    }

    fn notify(&self) {
        let unparked = self.unparked.swap(true, Ordering::Release);
        if !unparked {
            // If the thread has not been unparked yet, it must be done
            // now. If it was actually parked, it will run again,
            // otherwise the token made available by `unpark`
            // may be consumed before reaching `park()`, but `unparked`
            // ensures it is not forgotten.
            self.thread.unpark();
        }
    }
}

pub(crate) struct UnitWaker {
    id: UnitId,
    /// Set while the id sits in the ready queue, so repeated wakes between two
    /// polls enqueue it once.
    queued: AtomicBool,
    notify: Arc<ThreadNotify>,
}

impl UnitWaker {
    pub(crate) fn new(id: UnitId, notify: Arc<ThreadNotify>) -> Self {
        UnitWaker {
            id,
            queued: AtomicBool::new(false),
            notify,
        }
    }

    /// Called by the executor right before polling the task.
    pub(crate) fn dequeued(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

impl ArcWake for UnitWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        // The receiver only goes away with the runtime; a late wake is moot.
        if arc_self.notify.ready.unbounded_send(arc_self.id).is_err() {
            return;
        }
        arc_self.notify.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use futures::channel::mpsc;
    use futures::task::waker;

    #[test]
    fn repeated_wakes_queue_once() {
        let (tx, mut rx) = mpsc::unbounded();
        let notify = Arc::new(ThreadNotify::new(tx));
        let unit = Arc::new(UnitWaker::new(UnitId::new(7), notify.clone()));
        let waker = waker(unit.clone());

        waker.wake_by_ref();
        waker.wake_by_ref();

        assert_eq!(futures::executor::block_on(rx.next()), Some(UnitId::new(7)));
        assert!(rx.next().now_or_never().is_none());
        assert!(notify.unparked().load(Ordering::Acquire));

        unit.dequeued();
        waker.wake();
        assert_eq!(futures::executor::block_on(rx.next()), Some(UnitId::new(7)));
    }

    #[test]
    fn wakes_from_another_thread() {
        let (tx, mut rx) = mpsc::unbounded();
        let notify = Arc::new(ThreadNotify::new(tx));
        let waker = waker(Arc::new(UnitWaker::new(UnitId::new(3), notify)));

        thread::spawn(move || waker.wake()).join().unwrap();

        assert_eq!(futures::executor::block_on(rx.next()), Some(UnitId::new(3)));
    }
}
