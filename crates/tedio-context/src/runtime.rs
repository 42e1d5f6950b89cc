//! Single-threaded event loop that reports the lifecycle of every execution unit.
//!
//! Each turn of the loop drains the tick queue, fires expired timers and then
//! polls woken tasks. Ticks queued by a unit run as soon as that unit yields.
//! Every piece of work runs as a unit: the runtime assigns it a [`UnitId`],
//! announces it through [`AsyncHooks::init`], brackets each run with
//! `before`/`after` and finally reports `destroy`.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::mpsc::{self, UnboundedReceiver};
use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::hooks::{AsyncHooks, AsyncHost, HookId};
use crate::task::{JoinHandle, Task};
use crate::timer::{Sleep, TimerAction, TimerKey, Timers, YieldNow};
use crate::unit::{UnitId, UnitKind};
use crate::waker::ThreadNotify;

const DEFAULT_EVENT_INTERVAL: usize = 61;

/// Configures a [`Runtime`].
#[derive(Debug, Clone)]
pub struct Builder {
    event_interval: usize,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            event_interval: DEFAULT_EVENT_INTERVAL,
        }
    }

    /// How many task polls may happen in one turn before ticks and timers
    /// are serviced again.
    pub fn event_interval(mut self, polls: usize) -> Self {
        self.event_interval = polls;
        self
    }

    pub fn build(self) -> Result<Runtime> {
        if self.event_interval == 0 {
            return Err(Error::InvalidConfig(
                "event_interval must be at least 1".to_string(),
            ));
        }
        Ok(Runtime::with_builder(self))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

struct Tick {
    id: UnitId,
    callback: Box<dyn FnOnce()>,
}

struct Timeout {
    key: TimerKey,
    callback: Box<dyn FnOnce()>,
}

/// Identifies a callback scheduled with [`Handle::set_timeout`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutId(UnitId);

impl TimeoutId {
    pub fn unit(self) -> UnitId {
        self.0
    }
}

struct Shared {
    event_interval: usize,
    next_unit: Cell<u64>,
    next_hook: Cell<u64>,
    executing: Cell<UnitId>,
    running: Cell<bool>,
    live: Cell<usize>,
    hooks: RefCell<Vec<(HookId, Rc<dyn AsyncHooks>)>>,
    tasks: RefCell<HashMap<UnitId, Task>>,
    ticks: RefCell<VecDeque<Tick>>,
    timeouts: RefCell<HashMap<UnitId, Timeout>>,
    timers: RefCell<Timers>,
    notify: Arc<ThreadNotify>,
    ready: RefCell<UnboundedReceiver<UnitId>>,
}

impl Shared {
    fn hooks(&self) -> Vec<Rc<dyn AsyncHooks>> {
        self.hooks
            .borrow()
            .iter()
            .map(|(_, hooks)| hooks.clone())
            .collect()
    }

    fn create_unit(&self, kind: UnitKind) -> UnitId {
        let raw = self.next_unit.get() + 1;
        self.next_unit.set(raw);
        let id = UnitId::new(raw);
        let trigger = self.executing.get();
        self.live.set(self.live.get() + 1);

        trace!(unit = %id, %kind, %trigger, "unit created");
        for hooks in self.hooks() {
            hooks.init(id, kind, trigger);
        }
        id
    }

    fn destroy_unit(&self, id: UnitId) {
        self.live.set(self.live.get().saturating_sub(1));

        trace!(unit = %id, "unit destroyed");
        for hooks in self.hooks() {
            hooks.destroy(id);
        }
    }

    fn enter(&self, id: UnitId) -> UnitId {
        let previous = self.executing.replace(id);
        for hooks in self.hooks() {
            hooks.before(id);
        }
        previous
    }

    fn leave(&self, id: UnitId, previous: UnitId) {
        for hooks in self.hooks() {
            hooks.after(id);
        }
        self.executing.set(previous);
    }

    fn run_callback(&self, id: UnitId, callback: Box<dyn FnOnce()>) {
        let previous = self.enter(id);
        callback();
        self.leave(id, previous);
        self.destroy_unit(id);
    }

    fn insert_task(&self, task: Task) {
        task.schedule();
        self.tasks.borrow_mut().insert(task.id(), task);
    }

    fn run_ticks(&self) {
        loop {
            let Some(tick) = self.ticks.borrow_mut().pop_front() else {
                break;
            };
            self.run_callback(tick.id, tick.callback);
        }
    }

    fn fire_timers(&self) {
        let expired = self.timers.borrow_mut().expire(Instant::now());
        for action in expired {
            match action {
                TimerAction::Wake(waker) => waker.wake(),
                TimerAction::Fire(id) => {
                    let Some(timeout) = self.timeouts.borrow_mut().remove(&id) else {
                        continue;
                    };
                    self.run_callback(id, timeout.callback);
                    self.run_ticks();
                }
            }
        }
    }

    fn next_ready(&self) -> Option<UnitId> {
        self.ready.borrow_mut().next().now_or_never().flatten()
    }

    /// Poll woken tasks. Returns `true` when the poll budget ran out with
    /// tasks still queued.
    fn poll_ready(&self) -> bool {
        self.notify.unparked().store(false, Ordering::Release);

        for _ in 0..self.event_interval {
            let Some(id) = self.next_ready() else {
                return false;
            };
            // Stale wake for a finished task.
            let Some(mut task) = self.tasks.borrow_mut().remove(&id) else {
                continue;
            };

            trace!(unit = %id, label = task.label(), "polling task");
            let previous = self.enter(id);
            let poll = task.poll();
            self.leave(id, previous);

            match poll {
                Poll::Ready(()) => {
                    drop(task);
                    self.destroy_unit(id);
                }
                Poll::Pending => {
                    self.tasks.borrow_mut().insert(id, task);
                }
            }
            self.run_ticks();
        }

        true
    }

    fn park(&self) {
        if self.notify.unparked().swap(false, Ordering::Acquire) {
            return;
        }

        let next_deadline = self.timers.borrow().next_deadline();
        match next_deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    trace!(timeout = ?(deadline - now), "parking until next timer");
                    thread::park_timeout(deadline - now);
                }
            }
            None => {
                trace!("parking until woken");
                thread::park();
            }
        }
    }

    /// Drop every outstanding unit, reporting each one as destroyed.
    fn shutdown(&self) {
        loop {
            let tasks: Vec<Task> = self.tasks.borrow_mut().drain().map(|(_, t)| t).collect();
            let ticks: Vec<Tick> = self.ticks.borrow_mut().drain(..).collect();
            let timeouts: Vec<_> = self.timeouts.borrow_mut().drain().collect();
            let timers = self.timers.borrow_mut().take_all();

            if tasks.is_empty() && ticks.is_empty() && timeouts.is_empty() && timers.is_empty() {
                break;
            }

            let mut ids: Vec<UnitId> = tasks.iter().map(Task::id).collect();
            ids.extend(ticks.iter().map(|tick| tick.id));
            ids.extend(timeouts.iter().map(|(id, _)| *id));
            ids.sort();

            debug!(units = ids.len(), "shutting down runtime");
            // Dropped futures may touch the runtime again; no borrows are held here.
            drop(tasks);
            drop(ticks);
            drop(timeouts);
            drop(timers);

            for id in ids {
                self.destroy_unit(id);
            }
        }
    }
}

/// A cheap, clonable reference to a [`Runtime`].
#[derive(Clone)]
pub struct Handle {
    shared: Rc<Shared>,
}

impl Handle {
    /// The unit currently executing, or [`UnitId::ROOT`] between units.
    pub fn execution_id(&self) -> UnitId {
        self.shared.executing.get()
    }

    /// Units created and not yet destroyed.
    pub fn live_units(&self) -> usize {
        self.shared.live.get()
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        self.spawn_named("task", fut)
    }

    /// Spawn with a label that shows up in trace events.
    pub fn spawn_named<F>(&self, label: &'static str, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        let id = self.shared.create_unit(UnitKind::Task);
        let (task, receiver) = Task::new(id, label, fut, self.shared.notify.clone());
        self.shared.insert_task(task);
        JoinHandle::new(receiver)
    }

    /// Run `callback` as its own unit at the start of the next turn.
    pub fn next_tick<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.push_tick(Box::new(callback));
    }

    fn push_tick(&self, callback: Box<dyn FnOnce()>) {
        let id = self.shared.create_unit(UnitKind::Tick);
        self.shared.ticks.borrow_mut().push_back(Tick { id, callback });
    }

    /// Run `callback` as its own unit once `delay` has passed.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimeoutId
    where
        F: FnOnce() + 'static,
    {
        let id = self.shared.create_unit(UnitKind::Timeout);
        let key = self
            .shared
            .timers
            .borrow_mut()
            .insert(Instant::now() + delay, TimerAction::Fire(id));
        self.shared.timeouts.borrow_mut().insert(
            id,
            Timeout {
                key,
                callback: Box::new(callback),
            },
        );
        TimeoutId(id)
    }

    /// Cancel a pending timeout. Returns `false` if it already fired.
    pub fn clear_timeout(&self, timeout: TimeoutId) -> bool {
        let Some(entry) = self.shared.timeouts.borrow_mut().remove(&timeout.0) else {
            return false;
        };
        self.shared.timers.borrow_mut().remove(entry.key);
        drop(entry);
        self.shared.destroy_unit(timeout.0);
        true
    }

    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self.clone(), Instant::now() + duration)
    }

    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new()
    }

    pub fn enable_hooks(&self, hooks: Rc<dyn AsyncHooks>) -> HookId {
        let raw = self.shared.next_hook.get() + 1;
        self.shared.next_hook.set(raw);
        let id = HookId(raw);
        self.shared.hooks.borrow_mut().push((id, hooks));
        debug!(hook = raw, "hooks enabled");
        id
    }

    pub fn disable_hooks(&self, id: HookId) -> bool {
        let mut hooks = self.shared.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(installed, _)| *installed != id);
        let removed = hooks.len() != before;
        if removed {
            debug!(hook = id.0, "hooks disabled");
        }
        removed
    }

    pub(crate) fn register_timer(&self, deadline: Instant, action: TimerAction) -> TimerKey {
        self.shared.timers.borrow_mut().insert(deadline, action)
    }

    pub(crate) fn refresh_timer(&self, key: TimerKey, waker: &Waker) -> bool {
        self.shared.timers.borrow_mut().refresh(key, waker)
    }

    pub(crate) fn cancel_timer(&self, key: TimerKey) {
        // Removed outside the borrow: the entry may hold the last waker clone.
        let removed = self.shared.timers.borrow_mut().remove(key);
        drop(removed);
    }
}

impl AsyncHost for Handle {
    fn execution_id(&self) -> UnitId {
        Handle::execution_id(self)
    }

    fn enable_hooks(&self, hooks: Rc<dyn AsyncHooks>) -> HookId {
        Handle::enable_hooks(self, hooks)
    }

    fn disable_hooks(&self, id: HookId) -> bool {
        Handle::disable_hooks(self, id)
    }

    fn next_tick(&self, callback: Box<dyn FnOnce()>) {
        self.push_tick(callback);
    }

    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        let id = self.shared.create_unit(UnitKind::Task);
        let task = Task::from_boxed(id, "local", future, self.shared.notify.clone());
        self.shared.insert_task(task);
    }
}

/// Owns the event loop. Dropping it destroys every unit still pending.
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_builder(Builder::new())
    }

    /// Start configuring a runtime.
    pub fn builder() -> Builder {
        Builder::new()
    }

    fn with_builder(builder: Builder) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        let shared = Shared {
            event_interval: builder.event_interval,
            next_unit: Cell::new(0),
            next_hook: Cell::new(0),
            executing: Cell::new(UnitId::ROOT),
            running: Cell::new(false),
            live: Cell::new(0),
            hooks: RefCell::new(Vec::new()),
            tasks: RefCell::new(HashMap::new()),
            ticks: RefCell::new(VecDeque::new()),
            timeouts: RefCell::new(HashMap::new()),
            timers: RefCell::new(Timers::default()),
            notify: Arc::new(ThreadNotify::new(sender)),
            ready: RefCell::new(receiver),
        };

        Runtime {
            handle: Handle {
                shared: Rc::new(shared),
            },
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run the loop until `future` completes. The future itself runs as a
    /// task unit.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + 'static,
    {
        let shared = &self.handle.shared;
        if shared.running.replace(true) {
            return Err(Error::AlreadyRunning);
        }
        let _running = RunningGuard(&shared.running);

        let mut output = self.handle.spawn_named("block_on", future);
        debug!("runtime started");

        loop {
            shared.run_ticks();
            shared.fire_timers();
            let more = shared.poll_ready();

            if let Some(output) = (&mut output).now_or_never() {
                debug!("runtime finished");
                return Ok(output);
            }

            if more || !shared.ticks.borrow().is_empty() {
                continue;
            }

            shared.park();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.shared.shutdown();
    }
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            self.events.take()
        }
    }

    impl AsyncHooks for Recorder {
        fn init(&self, id: UnitId, kind: UnitKind, trigger: UnitId) {
            self.events
                .borrow_mut()
                .push(format!("init {id} {kind} by {trigger}"));
        }

        fn before(&self, id: UnitId) {
            self.events.borrow_mut().push(format!("before {id}"));
        }

        fn after(&self, id: UnitId) {
            self.events.borrow_mut().push(format!("after {id}"));
        }

        fn destroy(&self, id: UnitId) {
            self.events.borrow_mut().push(format!("destroy {id}"));
        }
    }

    #[test]
    fn spawned_task_output_is_joined() {
        let rt = Runtime::new();
        let handle = rt.handle().clone();

        let sum = rt
            .block_on(async move {
                let child = handle.spawn(async { 20 });
                child.await + 22
            })
            .unwrap();

        assert_eq!(sum, 42);
        assert_eq!(rt.handle().live_units(), 0);
    }

    #[test]
    fn lifecycle_notifications_bracket_every_unit() {
        let rt = Runtime::new();
        let recorder = Rc::new(Recorder::default());
        rt.handle().enable_hooks(recorder.clone());
        let handle = rt.handle().clone();

        rt.block_on(async move {
            handle.spawn(async {}).await;
        })
        .unwrap();

        assert_eq!(
            recorder.take(),
            vec![
                "init 1 task by 0",
                "before 1",
                "init 2 task by 1",
                "after 1",
                "before 2",
                "after 2",
                "destroy 2",
                "before 1",
                "after 1",
                "destroy 1",
            ]
        );
    }

    #[test]
    fn execution_id_tracks_the_running_unit() {
        let rt = Runtime::new();
        let handle = rt.handle().clone();
        assert_eq!(handle.execution_id(), UnitId::ROOT);

        let seen = Rc::new(Cell::new(UnitId::ROOT));
        let inner = handle.clone();
        let tick_seen = seen.clone();
        let root = rt
            .block_on(async move {
                let probe = inner.clone();
                inner.next_tick(move || tick_seen.set(probe.execution_id()));
                inner.yield_now().await;
                inner.execution_id()
            })
            .unwrap();

        assert_eq!(root, UnitId::new(1));
        assert_eq!(seen.get(), UnitId::new(2));
        assert_eq!(handle.execution_id(), UnitId::ROOT);
    }

    #[test]
    fn ticks_run_before_due_timeouts() {
        let rt = Runtime::new();
        let handle = rt.handle().clone();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = order.clone();
        rt.block_on(async move {
            let timeout_log = log.clone();
            handle.set_timeout(Duration::ZERO, move || timeout_log.borrow_mut().push("timeout"));
            let tick_log = log.clone();
            handle.next_tick(move || tick_log.borrow_mut().push("tick"));
            handle.sleep(Duration::from_millis(5)).await;
        })
        .unwrap();

        assert_eq!(*order.borrow(), vec!["tick", "timeout"]);
    }

    #[test]
    fn cleared_timeout_never_fires_but_is_destroyed() {
        let rt = Runtime::new();
        let handle = rt.handle().clone();
        let fired = Rc::new(Cell::new(false));

        let flag = fired.clone();
        let cleared = rt
            .block_on(async move {
                let id = handle.set_timeout(Duration::from_millis(1), move || flag.set(true));
                assert_eq!(id.unit(), UnitId::new(2));
                let cleared = handle.clear_timeout(id);
                handle.sleep(Duration::from_millis(5)).await;
                cleared && !handle.clear_timeout(id)
            })
            .unwrap();

        assert!(cleared);
        assert!(!fired.get());
        assert_eq!(rt.handle().live_units(), 0);
    }

    #[test]
    fn sleep_waits_for_its_deadline() {
        let rt = Runtime::new();
        let handle = rt.handle().clone();
        let started = Instant::now();
        let sleep = handle.sleep(Duration::from_millis(20));
        assert!(sleep.deadline() >= started + Duration::from_millis(20));

        rt.block_on(sleep).unwrap();

        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_sleep_suspends_once() {
        let rt = Runtime::new();
        let recorder = Rc::new(Recorder::default());
        rt.handle().enable_hooks(recorder.clone());
        let handle = rt.handle().clone();

        assert!(handle.sleep(Duration::ZERO).now_or_never().is_none());
        rt.block_on(async move { handle.sleep(Duration::ZERO).await })
            .unwrap();

        let resumes = recorder
            .take()
            .into_iter()
            .filter(|event| event == "before 1")
            .count();
        assert_eq!(resumes, 2);
    }

    #[test]
    fn nested_block_on_is_rejected() {
        let rt = Rc::new(Runtime::new());
        let inner = rt.clone();

        let nested = rt.block_on(async move { inner.block_on(async {}) }).unwrap();

        assert!(matches!(nested, Err(Error::AlreadyRunning)));
    }

    #[test]
    fn builder_rejects_zero_event_interval() {
        assert!(matches!(
            Builder::new().event_interval(0).build(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn small_event_interval_still_drives_every_task() {
        let rt = Runtime::builder().event_interval(1).build().unwrap();
        let handle = rt.handle().clone();

        let total = rt
            .block_on(async move {
                let handles: Vec<_> = (0..10u32)
                    .map(|i| {
                        let h = handle.clone();
                        handle.spawn(async move {
                            h.yield_now().await;
                            i
                        })
                    })
                    .collect();
                let mut total = 0;
                for handle in handles {
                    total += handle.await;
                }
                total
            })
            .unwrap();

        assert_eq!(total, 45);
    }

    #[test]
    fn dropping_the_runtime_destroys_pending_units() {
        let rt = Runtime::new();
        let recorder = Rc::new(Recorder::default());
        let handle = rt.handle().clone();

        rt.block_on(async move {
            drop(handle.spawn(futures::future::pending::<()>()));
            handle.set_timeout(Duration::from_secs(3600), || {});
        })
        .unwrap();
        rt.handle().enable_hooks(recorder.clone());
        assert_eq!(rt.handle().live_units(), 2);

        drop(rt);

        assert_eq!(recorder.take(), vec!["destroy 2", "destroy 3"]);
    }

    #[test]
    fn disabled_hooks_stop_receiving_events() {
        let rt = Runtime::new();
        let recorder = Rc::new(Recorder::default());
        let id = rt.handle().enable_hooks(recorder.clone());

        assert!(rt.handle().disable_hooks(id));
        assert!(!rt.handle().disable_hooks(id));
        rt.block_on(async {}).unwrap();

        assert!(recorder.take().is_empty());
    }
}
