//! A mutable key/value record, the default context type.

use std::cell::RefCell;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Interior-mutable JSON object shared by every unit of a chain.
///
/// Reads return clones; no borrow ever escapes a method call, so a record can
/// be read and written freely from anywhere in its chain.
#[derive(Debug, Default)]
pub struct Record {
    fields: RefCell<Map<String, Value>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::from(fields)),
            other => Err(Error::NotAnObject(kind_of(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.fields.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.borrow_mut().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.fields.borrow_mut().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.borrow().is_empty()
    }

    /// Shallow merge; incoming keys overwrite existing ones.
    pub fn merge(&self, fields: Map<String, Value>) {
        self.fields.borrow_mut().extend(fields);
    }

    /// Snapshot of the record as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.borrow().clone())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Record {
            fields: RefCell::new(fields),
        }
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
