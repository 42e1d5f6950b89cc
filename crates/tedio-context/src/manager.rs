//! The context engine.
//!
//! A [`ContextManager`] listens to the lifecycle of every execution unit on its
//! host and keeps one slot, the current context, pointing at whatever was bound
//! to the unit that is running right now:
//!
//! - `init`: a unit created by a bound unit inherits its creator's context.
//! - `before`: the resuming unit's context becomes current, or the default
//!   context if it has none.
//! - `after`: current falls back to the default context.
//! - `destroy`: the unit's binding is released.
//!
//! [`ContextManager::run`] seeds a binding at the root of a new chain; the
//! handlers carry it to everything the chain spawns.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::mem;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::channel::oneshot;
use tracing::{debug, trace};

use crate::hooks::{AsyncHooks, AsyncHost, HookId};
use crate::registry::Registry;
use crate::runtime::Handle;
use crate::task::JoinHandle;
use crate::unit::{UnitId, UnitKind};

struct State<C> {
    registry: Registry<C>,
    current: Rc<C>,
    default: Rc<C>,
}

struct Inner<C, H: AsyncHost> {
    host: H,
    hook: Cell<Option<HookId>>,
    state: RefCell<State<C>>,
}

impl<C, H: AsyncHost> Inner<C, H> {
    /// Bind `context` to `id` and make it current. Returns the previous
    /// current context.
    fn bind(&self, id: UnitId, context: Rc<C>) -> Rc<C> {
        let mut state = self.state.borrow_mut();
        state.registry.bind(id, context.clone());
        mem::replace(&mut state.current, context)
    }

    fn restore_current(&self, saved: Rc<C>) {
        let replaced = mem::replace(&mut self.state.borrow_mut().current, saved);
        drop(replaced);
    }

    fn propagate(&self, child: UnitId) {
        let parent = self.host.execution_id();
        if self.state.borrow_mut().registry.inherit(parent, child) {
            trace!(unit = %child, %parent, "context inherited");
        }
    }

    fn resume(&self, id: UnitId) {
        let mut state = self.state.borrow_mut();
        let next = match state.registry.lookup(id) {
            Some(context) => context,
            None => state.default.clone(),
        };
        let replaced = mem::replace(&mut state.current, next);
        drop(state);
        drop(replaced);
    }

    fn suspend(&self) {
        let mut state = self.state.borrow_mut();
        let default = state.default.clone();
        let replaced = mem::replace(&mut state.current, default);
        drop(state);
        drop(replaced);
    }

    fn release(&self, id: UnitId) {
        let released = self.state.borrow_mut().registry.release(id);
        if released.is_some() {
            trace!(unit = %id, "context released");
        }
    }
}

impl<C, H: AsyncHost> Drop for Inner<C, H> {
    fn drop(&mut self) {
        if let Some(id) = self.hook.take() {
            self.host.disable_hooks(id);
        }
    }
}

/// Lifecycle handlers installed on the host. Holds the engine weakly so the
/// host's hook list does not keep it alive.
struct Tracker<C, H: AsyncHost> {
    inner: Weak<Inner<C, H>>,
}

impl<C, H: AsyncHost> AsyncHooks for Tracker<C, H> {
    fn init(&self, id: UnitId, _kind: UnitKind, _trigger: UnitId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.propagate(id);
        }
    }

    fn before(&self, id: UnitId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.resume(id);
        }
    }

    fn after(&self, _id: UnitId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.suspend();
        }
    }

    fn destroy(&self, id: UnitId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release(id);
        }
    }
}

/// Tracks which context is current for the unit executing on `H`.
///
/// Cloning is cheap and every clone shares the same state. Contexts are
/// compared by identity (`Rc::ptr_eq`), never by value. Hooks stay installed
/// until the last clone is dropped.
pub struct ContextManager<C, H: AsyncHost = Handle> {
    inner: Rc<Inner<C, H>>,
}

impl<C, H: AsyncHost> Clone for ContextManager<C, H> {
    fn clone(&self) -> Self {
        ContextManager {
            inner: self.inner.clone(),
        }
    }
}

impl<C: 'static, H: AsyncHost> ContextManager<C, H> {
    /// Create an engine whose default context is `C::default()` and start
    /// tracking units on `host`.
    pub fn new(host: H) -> Self
    where
        C: Default,
    {
        Self::with_default(host, Rc::new(C::default()))
    }

    pub fn with_default(host: H, default: Rc<C>) -> Self {
        let inner = Rc::new(Inner {
            host,
            hook: Cell::new(None),
            state: RefCell::new(State {
                registry: Registry::new(),
                current: default.clone(),
                default,
            }),
        });

        let tracker: Rc<dyn AsyncHooks> = Rc::new(Tracker {
            inner: Rc::downgrade(&inner),
        });
        let hook = inner.host.enable_hooks(tracker);
        inner.hook.set(Some(hook));
        debug!("context tracking enabled");

        ContextManager { inner }
    }

    /// The context bound to the running unit, or the default context.
    pub fn current(&self) -> Rc<C> {
        self.inner.state.borrow().current.clone()
    }

    /// The context unbound code sees.
    pub fn default_context(&self) -> Rc<C> {
        self.inner.state.borrow().default.clone()
    }

    /// Replace the default context. Returns `false` if `context` already is
    /// the default.
    ///
    /// When nothing is bound right now, current moves to the new default as
    /// well. Contexts bound to in-flight chains are untouched.
    pub fn set_default(&self, context: Rc<C>) -> bool {
        let mut state = self.inner.state.borrow_mut();
        if Rc::ptr_eq(&state.default, &context) {
            return false;
        }

        let mut replaced = Vec::with_capacity(2);
        if Rc::ptr_eq(&state.current, &state.default) {
            replaced.push(mem::replace(&mut state.current, context.clone()));
        }
        replaced.push(mem::replace(&mut state.default, context));
        drop(state);
        drop(replaced);

        debug!("default context replaced");
        true
    }

    /// Run the future produced by `continuation` with `context` bound to it
    /// and to every unit it spawns, directly or transitively.
    ///
    /// The continuation is invoked at the start of the next tick, from a fresh
    /// unit that becomes the root of the chain. `current` already reports
    /// `context` while the continuation builds its future. The returned handle
    /// resolves with the future's output unchanged, so errors pass straight
    /// through. If the host drops the chain before it finishes, the handle
    /// never resolves.
    pub fn run<F, Fut>(&self, context: Rc<C>, continuation: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let inner = self.inner.clone();

        self.inner.host.next_tick(Box::new(move || {
            let root = inner.host.execution_id();
            let saved = inner.bind(root, context);
            debug!(unit = %root, "context bound to chain root");

            let fut = continuation();
            inner.host.spawn_local(
                async move {
                    // The caller may have stopped waiting.
                    let _ = sender.send(fut.await);
                }
                .boxed_local(),
            );

            // Only undoes the synchronous switch above. The chain keeps its
            // binding through the registry.
            inner.restore_current(saved);
        }));

        JoinHandle::new(receiver)
    }

    /// Number of units that currently carry a binding.
    pub fn bound_units(&self) -> usize {
        self.inner.state.borrow().registry.len()
    }

    /// Whether `id` currently carries a binding.
    pub fn is_bound(&self, id: UnitId) -> bool {
        self.inner.state.borrow().registry.contains(id)
    }

    /// The host whose units this engine tracks.
    pub fn host(&self) -> &H {
        &self.inner.host
    }
}
