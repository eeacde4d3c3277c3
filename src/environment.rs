//! Binding scopes linked child → parent.
//!
//! Environments are shared through `Rc<RefCell<_>>`: closures and active call
//! frames hold the scope they were created in, and an assignment through one
//! holder is visible to all of them.  Parents never point at children.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// New shared scope enclosed by `enclosing`.
    pub fn child(enclosing: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(enclosing))))
    }

    /// Adds or overwrites a binding in this scope.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Looks `name` up in this scope only.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    /// Looks `name` up exactly `distance` hops up the chain.
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        if distance == 0 {
            return self.get(name);
        }

        self.enclosing
            .as_ref()
            .and_then(|enclosing| enclosing.borrow().get_at(distance - 1, name))
    }

    /// Overwrites an existing binding in this scope.  Returns `false` when
    /// the scope has no such binding; assignment never creates one.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn assign_at(&mut self, distance: usize, name: &str, value: Value) -> bool {
        if distance == 0 {
            return self.assign(name, value);
        }

        match &self.enclosing {
            Some(enclosing) => enclosing.borrow_mut().assign_at(distance - 1, name, value),
            None => false,
        }
    }
}

// Traversal used by the cycle collector.
impl Environment {
    pub(crate) fn enclosing(&self) -> Option<&EnvRef> {
        self.enclosing.as_ref()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    /// Drops every binding, keeping the link to the parent.
    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for Environment {
    /// Names only: values may be closures that capture this very scope.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();

        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_enclosing", &self.enclosing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (EnvRef, EnvRef, EnvRef) {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let middle = Environment::child(&globals);
        let inner = Environment::child(&middle);
        (globals, middle, inner)
    }

    #[test]
    fn get_at_walks_exact_distance() {
        let (globals, middle, inner) = chain();
        globals.borrow_mut().define("a", Value::string("global"));
        middle.borrow_mut().define("a", Value::string("middle"));

        let inner = inner.borrow();
        assert_eq!(inner.get_at(1, "a"), Some(Value::string("middle")));
        assert_eq!(inner.get_at(2, "a"), Some(Value::string("global")));
        assert_eq!(inner.get_at(0, "a"), None);
    }

    #[test]
    fn assignment_never_creates_a_binding() {
        let (_globals, middle, inner) = chain();
        middle.borrow_mut().define("n", Value::Number(1.0));

        assert!(!inner.borrow_mut().assign_at(0, "n", Value::Number(2.0)));
        assert!(inner.borrow_mut().assign_at(1, "n", Value::Number(2.0)));
        assert_eq!(middle.borrow().get("n"), Some(Value::Number(2.0)));
        assert_eq!(inner.borrow().get("n"), None);
    }

    #[test]
    fn assignment_is_visible_to_every_holder() {
        let (globals, _middle, _inner) = chain();
        globals.borrow_mut().define("count", Value::Number(0.0));

        let holder_a = Environment::child(&globals);
        let holder_b = Environment::child(&globals);

        holder_a
            .borrow_mut()
            .assign_at(1, "count", Value::Number(5.0));

        assert_eq!(holder_b.borrow().get_at(1, "count"), Some(Value::Number(5.0)));
    }

    #[test]
    fn define_overwrites_in_place() {
        let mut env = Environment::new();
        env.define("x", Value::Nil);
        env.define("x", Value::Bool(true));

        assert_eq!(env.get("x"), Some(Value::Bool(true)));
    }
}
