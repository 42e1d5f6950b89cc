//! Lifecycle notifications and the host contract consumed by the context engine.

use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::unit::{UnitId, UnitKind};

/// Reactions to the lifecycle of execution units.
///
/// The host calls these synchronously around every unit:
///
/// - `init` inside the call that created the unit, while
///   [`AsyncHost::execution_id`] still reports the creator.
/// - `before` once the unit is the executing one, right before its code runs.
/// - `after` right after its code returns, before the executing id is restored.
/// - `destroy` exactly once, when the unit can never run again.
///
/// Implementations must not panic. They may create new units.
pub trait AsyncHooks {
    fn init(&self, _id: UnitId, _kind: UnitKind, _trigger: UnitId) {}

    fn before(&self, _id: UnitId) {}

    fn after(&self, _id: UnitId) {}

    fn destroy(&self, _id: UnitId) {}
}

/// Handle for an installed set of hooks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

/// What a context engine needs from the runtime underneath it.
pub trait AsyncHost: Clone + 'static {
    /// The unit currently executing, or [`UnitId::ROOT`] between units.
    fn execution_id(&self) -> UnitId;

    /// Install `hooks`; they receive notifications until disabled.
    fn enable_hooks(&self, hooks: Rc<dyn AsyncHooks>) -> HookId;

    /// Remove a hook set. Returns `false` if it was not installed.
    fn disable_hooks(&self, id: HookId) -> bool;

    /// Run `callback` as its own unit at the start of the next turn.
    fn next_tick(&self, callback: Box<dyn FnOnce()>);

    /// Drive `future` to completion as a new task unit.
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>);
}
