//! Classes, instances and method lookup.
//!
//! Lookup is explicit: an instance's own fields first, then its class's
//! method table, then each superclass in turn.  A method found this way is
//! returned bound to the instance it was read from.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::callable::{BoundMethod, Callable, Function};
use crate::value::Value;

pub const INITIALIZER: &str = "init";

pub struct LoxClass {
    pub name: String,
    pub superclass: Option<Rc<LoxClass>>,
    methods: HashMap<String, Rc<Function>>,
}

impl LoxClass {
    pub fn new(
        name: impl Into<String>,
        superclass: Option<Rc<LoxClass>>,
        methods: HashMap<String, Rc<Function>>,
    ) -> Self {
        LoxClass {
            name: name.into(),
            superclass,
            methods,
        }
    }

    /// Method named `name` on this class or the nearest ancestor defining it.
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        let mut class = Some(self);

        while let Some(current) = class {
            if let Some(method) = current.methods.get(name) {
                return Some(Rc::clone(method));
            }
            class = current.superclass.as_deref();
        }

        None
    }

    pub(crate) fn methods(&self) -> impl Iterator<Item = &Rc<Function>> {
        self.methods.values()
    }

    /// Constructor arity: the initializer's, or zero without one.
    pub fn arity(&self) -> usize {
        self.find_method(INITIALIZER)
            .map_or(0, |init| init.arity())
    }
}

impl fmt::Debug for LoxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();

        f.debug_struct("LoxClass")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|class| class.name.as_str()),
            )
            .field("methods", &methods)
            .finish()
    }
}

pub struct Instance {
    pub class: Rc<LoxClass>,
    fields: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<LoxClass>) -> Self {
        Instance {
            class,
            fields: RefCell::new(HashMap::new()),
        }
    }

    /// Field value, or a method bound to this instance.  `None` when the name
    /// is neither.
    pub fn get(self: &Rc<Self>, name: &str) -> Option<Value> {
        if let Some(value) = self.fields.borrow().get(name) {
            return Some(value.clone());
        }

        self.class
            .find_method(name)
            .map(|method| bind(method, Rc::clone(self)))
    }

    /// Writes a field, creating it if absent.  Methods are never replaced.
    pub fn set(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    /// Copies of the field values, or `None` while the fields are being
    /// written.
    pub(crate) fn field_values(&self) -> Option<Vec<Value>> {
        let fields = self.fields.try_borrow().ok()?;
        Some(fields.values().cloned().collect())
    }

    pub(crate) fn clear_fields(&self) {
        if let Ok(mut fields) = self.fields.try_borrow_mut() {
            fields.clear();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.borrow();
        let mut names: Vec<&str> = fields.keys().map(String::as_str).collect();
        names.sort_unstable();

        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field("fields", &names)
            .finish()
    }
}

/// Fixes `this` for `method` to `receiver`.
pub fn bind(method: Rc<Function>, receiver: Rc<Instance>) -> Value {
    Value::Callable(Callable::BoundMethod(Rc::new(BoundMethod {
        method,
        receiver,
    })))
}
