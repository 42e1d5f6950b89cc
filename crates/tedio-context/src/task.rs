//! Spawned tasks and their join handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot::{self, Receiver as OneshotReceiver};
use futures::future::{Fuse, LocalBoxFuture};
use futures::task::waker_ref;
use pin_project::pin_project;

use crate::unit::UnitId;
use crate::waker::{ThreadNotify, UnitWaker};

pub(crate) struct Task {
    id: UnitId,
    label: &'static str,
    fut: LocalBoxFuture<'static, ()>,
    waker: Arc<UnitWaker>,
}

impl Task {
    pub(crate) fn new<F>(
        id: UnitId,
        label: &'static str,
        fut: F,
        notify: Arc<ThreadNotify>,
    ) -> (Self, OneshotReceiver<F::Output>)
    where
        F: Future + 'static,
    {
        let (output_sender, receiver) = oneshot::channel();

        let fut = async move {
            let output = fut.await;
            // Nobody is waiting on a detached task.
            let _ = output_sender.send(output);
        };

        (Self::from_boxed(id, label, fut.boxed_local(), notify), receiver)
    }

    pub(crate) fn from_boxed(
        id: UnitId,
        label: &'static str,
        fut: LocalBoxFuture<'static, ()>,
        notify: Arc<ThreadNotify>,
    ) -> Self {
        Task {
            id,
            label,
            fut,
            waker: Arc::new(UnitWaker::new(id, notify)),
        }
    }

    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn poll(&mut self) -> Poll<()> {
        self.waker.dequeued();
        let waker = waker_ref(&self.waker);
        let cx = &mut Context::from_waker(&waker);
        self.fut.poll_unpin(cx)
    }

    /// Queue the task for its first poll.
    pub(crate) fn schedule(&self) {
        waker_ref(&self.waker).wake_by_ref();
    }
}

/// A handle to a spawned task's output.
///
/// Dropping the handle detaches the task; it keeps running. If the task
/// itself is dropped before finishing (the runtime shut down), the handle
/// never resolves.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct JoinHandle<T> {
    receiver: Fuse<OneshotReceiver<T>>,
    is_terminated: bool,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(receiver: OneshotReceiver<T>) -> Self {
        Self {
            receiver: receiver.fuse(),
            is_terminated: false,
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if *this.is_terminated {
            return Poll::Pending;
        }

        if let Poll::Ready(Ok(output)) = this.receiver.poll_unpin(cx) {
            *this.is_terminated = true;
            return Poll::Ready(output);
        };

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    fn notify() -> Arc<ThreadNotify> {
        let (tx, _rx) = mpsc::unbounded();
        Arc::new(ThreadNotify::new(tx))
    }

    #[test]
    fn task_output_reaches_handle() {
        let (mut task, receiver) = Task::new(UnitId::new(1), "answer", async { 42 }, notify());
        let handle = JoinHandle::new(receiver);

        assert_eq!(task.poll(), Poll::Ready(()));
        assert_eq!(task.label(), "answer");
        assert_eq!(handle.now_or_never(), Some(42));
    }

    #[test]
    fn dropped_task_never_resolves() {
        let (task, receiver) = Task::new(UnitId::new(2), "dropped", async { 1 }, notify());
        let handle = JoinHandle::new(receiver);
        drop(task);

        assert_eq!(handle.now_or_never(), None);
    }
}
