//! Unit-to-context bindings.

use std::collections::HashMap;
use std::rc::Rc;

use crate::unit::UnitId;

/// Maps live execution units to the context bound to them.
///
/// An entry exists from the moment a unit is bound (as a chain root, or by
/// inheriting from its creator) until the runtime destroys that unit.
pub(crate) struct Registry<C> {
    bindings: HashMap<UnitId, Rc<C>>,
}

impl<C> Registry<C> {
    pub(crate) fn new() -> Self {
        Registry {
            bindings: HashMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, id: UnitId, context: Rc<C>) {
        self.bindings.insert(id, context);
    }

    /// Copy the parent's binding to `child`. Returns whether anything was bound.
    pub(crate) fn inherit(&mut self, parent: UnitId, child: UnitId) -> bool {
        if parent == child {
            return false;
        }
        match self.bindings.get(&parent) {
            Some(context) => {
                let context = context.clone();
                self.bindings.insert(child, context);
                true
            }
            None => false,
        }
    }

    pub(crate) fn lookup(&self, id: UnitId) -> Option<Rc<C>> {
        self.bindings.get(&id).cloned()
    }

    pub(crate) fn release(&mut self, id: UnitId) -> Option<Rc<C>> {
        self.bindings.remove(&id)
    }

    pub(crate) fn contains(&self, id: UnitId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherit_shares_the_parent_context() {
        let mut registry = Registry::new();
        let context = Rc::new("alice");
        registry.bind(UnitId::new(1), context.clone());

        assert!(registry.inherit(UnitId::new(1), UnitId::new(2)));
        assert!(Rc::ptr_eq(&registry.lookup(UnitId::new(2)).unwrap(), &context));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn inherit_ignores_unbound_parents_and_self() {
        let mut registry = Registry::new();
        registry.bind(UnitId::new(1), Rc::new(()));

        assert!(!registry.inherit(UnitId::new(5), UnitId::new(6)));
        assert!(!registry.inherit(UnitId::new(1), UnitId::new(1)));
        assert!(!registry.contains(UnitId::new(6)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn release_is_a_noop_for_unknown_units() {
        let mut registry: Registry<()> = Registry::new();
        registry.bind(UnitId::new(4), Rc::new(()));

        assert!(registry.release(UnitId::new(9)).is_none());
        assert!(registry.release(UnitId::new(4)).is_some());
        assert!(registry.release(UnitId::new(4)).is_none());
        assert_eq!(registry.len(), 0);
    }
}
