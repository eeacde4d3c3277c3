//! Callable values: user functions, native functions and bound methods.
//!
//! Invocation itself lives in the interpreter, which owns the machinery for
//! executing a body; this module only describes what can be called.

use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use log::debug;

use crate::ast::FunctionDecl;
use crate::class::Instance;
use crate::environment::EnvRef;
use crate::value::Value;

#[derive(Clone)]
pub enum Callable {
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(function) => function.arity(),
            Callable::Native(native) => native.arity,
            Callable::BoundMethod(bound) => bound.method.arity(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Function(function) => function.name(),
            Callable::Native(native) => native.name,
            Callable::BoundMethod(bound) => bound.method.name(),
        }
    }

    /// Identity comparison.  Two bound methods are the same only if they are
    /// the same binding, not merely the same method on the same receiver.
    pub fn ptr_eq(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Callable::Native(a), Callable::Native(b)) => Rc::ptr_eq(a, b),
            (Callable::BoundMethod(a), Callable::BoundMethod(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native(_) => f.write_str("<native fn>"),
            other => write!(f, "<fn {}>", other.name()),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({}/{})", self.name(), self.arity())
    }
}

/// A closure: a declaration plus the environment active where the function
/// value was created.
pub struct Function {
    pub declaration: Rc<FunctionDecl>,
    pub closure: EnvRef,
    /// `init` methods yield their receiver no matter how they return.
    pub is_initializer: bool,
}

impl Function {
    pub fn new(declaration: Rc<FunctionDecl>, closure: EnvRef, is_initializer: bool) -> Self {
        Function {
            declaration,
            closure,
            is_initializer,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name.name
    }

    pub fn arity(&self) -> usize {
        self.declaration.params.len()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({}/{})", self.name(), self.arity())
    }
}

/// Host function exposed to scripts.  It receives the evaluated arguments
/// and never touches the environment chain.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

/// A method paired with the instance `this` refers to while it runs.
pub struct BoundMethod {
    pub method: Rc<Function>,
    pub receiver: Rc<Instance>,
}

/// Built‑ins defined in every global environment.
pub fn natives() -> Vec<NativeFunction> {
    vec![NativeFunction {
        name: "clock",
        arity: 0,
        func: clock,
    }]
}

/// Seconds since the Unix epoch.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let timestamp: f64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e: SystemTimeError| format!("Clock error: {}", e))?
        .as_secs_f64();

    debug!("Native function 'clock' returned: {}", timestamp);

    Ok(Value::Number(timestamp))
}
