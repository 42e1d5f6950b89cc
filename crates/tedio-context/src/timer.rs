//! Deadline bookkeeping plus the `sleep` and `yield_now` suspension points.

use std::collections::BTreeMap;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use pin_project::{pin_project, pinned_drop};

use crate::runtime::Handle;
use crate::unit::UnitId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    deadline: Instant,
    seq: u64,
}

pub(crate) enum TimerAction {
    /// Wake a suspended task.
    Wake(Waker),
    /// Run the callback of a timeout unit.
    Fire(UnitId),
}

#[derive(Default)]
pub(crate) struct Timers {
    entries: BTreeMap<TimerKey, TimerAction>,
    seq: u64,
}

impl Timers {
    pub(crate) fn insert(&mut self, deadline: Instant, action: TimerAction) -> TimerKey {
        self.seq += 1;
        let key = TimerKey {
            deadline,
            seq: self.seq,
        };
        self.entries.insert(key, action);
        key
    }

    /// Point a pending wake entry at a fresh waker. Returns `false` once the
    /// entry has fired or been removed.
    pub(crate) fn refresh(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self.entries.get_mut(&key) {
            Some(TimerAction::Wake(current)) => {
                if !current.will_wake(waker) {
                    *current = waker.clone();
                }
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove(&mut self, key: TimerKey) -> Option<TimerAction> {
        self.entries.remove(&key)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|key| key.deadline)
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<TimerAction> {
        let pending = self.entries.split_off(&TimerKey {
            deadline: now,
            seq: u64::MAX,
        });
        mem::replace(&mut self.entries, pending)
            .into_values()
            .collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<TimerAction> {
        mem::take(&mut self.entries).into_values().collect()
    }
}

/// Future returned by [`Handle::sleep`].
///
/// Always suspends at least once, even for a deadline that is already due;
/// the wake then comes from the next turn's timer pass.
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    handle: Handle,
    deadline: Instant,
    key: Option<TimerKey>,
    polled: bool,
}

impl Sleep {
    pub(crate) fn new(handle: Handle, deadline: Instant) -> Self {
        Sleep {
            handle,
            deadline,
            key: None,
            polled: false,
        }
    }

    /// When the sleep completes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if *this.polled && Instant::now() >= *this.deadline {
            if let Some(key) = this.key.take() {
                this.handle.cancel_timer(key);
            }
            return Poll::Ready(());
        }

        let refreshed = match *this.key {
            Some(key) => this.handle.refresh_timer(key, cx.waker()),
            None => false,
        };
        if !refreshed {
            let key = this
                .handle
                .register_timer(*this.deadline, TimerAction::Wake(cx.waker().clone()));
            *this.key = Some(key);
        }
        *this.polled = true;

        Poll::Pending
    }
}

#[pinned_drop]
impl PinnedDrop for Sleep {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(key) = this.key.take() {
            this.handle.cancel_timer(key);
        }
    }
}

/// Future returned by [`Handle::yield_now`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new() -> Self {
        YieldNow { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expire_takes_due_entries_in_order() {
        let mut timers = Timers::default();
        let now = Instant::now();
        timers.insert(now + Duration::from_secs(60), TimerAction::Fire(UnitId::new(3)));
        timers.insert(now, TimerAction::Fire(UnitId::new(2)));
        timers.insert(now - Duration::from_millis(5), TimerAction::Fire(UnitId::new(1)));

        let fired: Vec<UnitId> = timers
            .expire(now)
            .into_iter()
            .filter_map(|action| match action {
                TimerAction::Fire(id) => Some(id),
                TimerAction::Wake(_) => None,
            })
            .collect();

        assert_eq!(fired, vec![UnitId::new(1), UnitId::new(2)]);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn refresh_fails_after_removal() {
        let mut timers = Timers::default();
        let waker = futures::task::noop_waker();
        let key = timers.insert(Instant::now(), TimerAction::Wake(waker.clone()));

        assert!(timers.refresh(key, &waker));
        assert!(timers.remove(key).is_some());
        assert!(!timers.refresh(key, &waker));
        assert!(timers.take_all().is_empty());
    }
}
