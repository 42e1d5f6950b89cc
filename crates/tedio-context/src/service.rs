//! Field-level access to whatever context is current.

use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::hooks::AsyncHost;
use crate::manager::ContextManager;
use crate::record::{Record, kind_of};
use crate::runtime::Handle;

/// Reads and writes fields of the current [`Record`] as if they were its own.
///
/// Every call resolves the current context afresh, so the same service can be
/// shared by all chains.
pub struct ContextService<H: AsyncHost = Handle> {
    manager: ContextManager<Record, H>,
}

impl<H: AsyncHost> Clone for ContextService<H> {
    fn clone(&self) -> Self {
        ContextService {
            manager: self.manager.clone(),
        }
    }
}

impl<H: AsyncHost> ContextService<H> {
    pub fn new(manager: ContextManager<Record, H>) -> Self {
        ContextService { manager }
    }

    pub fn manager(&self) -> &ContextManager<Record, H> {
        &self.manager
    }

    /// The live current context.
    pub fn get(&self) -> Rc<Record> {
        self.manager.current()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.get().get(key)
    }

    /// Read a field as `T`. `Ok(None)` if the field is absent.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.value(key) else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| Error::Decode {
                key: key.to_string(),
                source,
            })
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|source| Error::Encode {
            key: key.to_string(),
            source,
        })?;
        self.get().insert(key, value);
        Ok(())
    }

    /// Shallow-merge the fields of `data`, which must serialize to an object.
    pub fn merge<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let value = serde_json::to_value(data).map_err(|source| Error::Encode {
            key: String::new(),
            source,
        })?;
        match value {
            Value::Object(fields) => {
                self.get().merge(fields);
                Ok(())
            }
            other => Err(Error::NotAnObject(kind_of(&other))),
        }
    }

    /// Call `f` with the live current context.
    pub fn with<R>(&self, f: impl FnOnce(&Record) -> R) -> R {
        f(&self.get())
    }

    pub fn set_default(&self, context: Rc<Record>) -> bool {
        self.manager.set_default(context)
    }
}

impl<H: AsyncHost> From<ContextManager<Record, H>> for ContextService<H> {
    fn from(manager: ContextManager<Record, H>) -> Self {
        Self::new(manager)
    }
}
