//! Request-scoping entry point.

use std::future::Future;
use std::rc::Rc;

use tracing::debug;

use crate::hooks::AsyncHost;
use crate::manager::ContextManager;
use crate::runtime::Handle;
use crate::task::JoinHandle;

/// Opens one context scope per inbound unit of work.
///
/// Call [`handle`](ContextMiddleware::handle) before any other tracked code for
/// that unit runs, with a freshly built context and the rest of the processing
/// as `next`.
pub struct ContextMiddleware<C, H: AsyncHost = Handle> {
    manager: ContextManager<C, H>,
}

impl<C, H: AsyncHost> Clone for ContextMiddleware<C, H> {
    fn clone(&self) -> Self {
        ContextMiddleware {
            manager: self.manager.clone(),
        }
    }
}

impl<C: 'static, H: AsyncHost> ContextMiddleware<C, H> {
    pub fn new(manager: ContextManager<C, H>) -> Self {
        ContextMiddleware { manager }
    }

    /// Run `next` inside a scope bound to `context`; resolves with its output.
    pub fn handle<F, Fut>(&self, context: Rc<C>, next: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future + 'static,
    {
        debug!("opening request scope");
        self.manager.run(context, next)
    }
}
