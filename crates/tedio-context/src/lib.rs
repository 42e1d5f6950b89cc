//! # Tedio Context
//!
//! Ambient request context for a single-threaded async runtime.
//!
//! ## Overview
//!
//! Code deep inside an async call chain often needs "the current request":
//! who is calling, which tenant, which trace. Tedio Context makes that value
//! reachable from anywhere in the chain without threading it through every
//! function, and keeps concurrent chains isolated from each other.
//!
//! It works by watching the lifecycle of every execution unit (task, tick or
//! timeout) on the bundled [`Runtime`]. A binding made at the root of a chain
//! is inherited by every unit the chain creates, restored whenever one of them
//! resumes, and released when the unit is destroyed.
//!
//! ## Features
//!
//! - **🧵 Ambient**: [`ContextManager::current`] works at any depth, across
//!   any number of suspension points
//! - **🔒 Isolated**: bindings are keyed by unit, never by a shared stack
//! - **🧹 Bounded**: bindings live exactly as long as their units
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tedio_context::{ContextManager, ContextService, Record, Runtime};
//!
//! let rt = Runtime::new();
//! let handle = rt.handle().clone();
//! let service = ContextService::new(ContextManager::new(handle.clone()));
//!
//! let context = Rc::new(Record::from_value(json!({ "user": "alice" })).unwrap());
//! let inner = service.clone();
//! let user = rt
//!     .block_on(service.manager().run(context, move || async move {
//!         handle.sleep(Duration::from_millis(1)).await;
//!         inner.value("user")
//!     }))
//!     .unwrap();
//!
//! assert_eq!(user, Some(json!("alice")));
//! assert_eq!(service.value("user"), None);
//! ```

pub mod error;
pub mod hooks;
pub mod manager;
pub mod middleware;
pub mod record;
mod registry;
pub mod runtime;
pub mod service;
pub mod task;
pub mod timer;
pub mod unit;
mod waker;

// Re-export commonly used items for convenience
pub use error::{Error, Result};
pub use hooks::{AsyncHooks, AsyncHost, HookId};
pub use manager::ContextManager;
pub use middleware::ContextMiddleware;
pub use record::Record;
pub use runtime::{Builder, Handle, Runtime, TimeoutId};
pub use service::ContextService;
pub use task::JoinHandle;
pub use unit::{UnitId, UnitKind};
