use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::interpreter::value::Value;

/// One lexical scope frame. Frames are shared by every closure and nested
/// scope that captured them, so they live behind `Rc<RefCell<_>>`.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Self {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Convenience for building a fresh child frame ready to be shared.
    pub fn child_of(enclosing: &Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(Self::with_enclosing(Rc::clone(enclosing))))
    }

    /// Bind `name` in this frame, overwriting any previous binding here.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(val) = self.values.get(name) {
            return Some(val.clone());
        }
        self.enclosing
            .as_ref()
            .and_then(|enclosing| enclosing.borrow().get(name))
    }

    /// Read `name` exactly `distance` frames up the chain.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        if distance == 0 {
            self.values.get(name).cloned()
        } else {
            self.enclosing
                .as_ref()
                .and_then(|enclosing| enclosing.borrow().get_at(distance - 1, name))
        }
    }

    /// Overwrite the nearest existing binding of `name`. Returns `false` when
    /// no frame in the chain defines it.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return true;
        }
        match self.enclosing {
            Some(ref enclosing) => enclosing.borrow_mut().assign(name, value),
            None => false,
        }
    }

    /// Write `name` exactly `distance` frames up the chain. Returns `false`
    /// when the chain is shorter than `distance`.
    pub fn assign_at(&mut self, distance: usize, name: &str, value: Value) -> bool {
        if distance == 0 {
            self.values.insert(name.to_string(), value);
            true
        } else {
            match self.enclosing {
                Some(ref enclosing) => enclosing
                    .borrow_mut()
                    .assign_at(distance - 1, name, value),
                None => false,
            }
        }
    }
}
