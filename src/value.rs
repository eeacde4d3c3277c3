use std::fmt;
use std::rc::Rc;

use crate::callable::Callable;
use crate::class::{Instance, LoxClass};

/// Every runtime value.  The set is closed: dispatch is a `match`, never a
/// trait object.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Callable(Callable),
    Class(Rc<LoxClass>),
    Instance(Rc<Instance>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Kind name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Callable(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
        }
    }

    /// Short description naming both kind and value, e.g. `string "hi"`.
    pub fn describe(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::String(s) => format!("string \"{}\"", s),
            other => format!("{} {}", other.type_name(), other),
        }
    }
}

impl PartialEq for Value {
    /// Different kinds are never equal; numbers compare by IEEE value,
    /// strings by content, and callables, classes and instances by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),

            Value::Bool(b) => write!(f, "{}", b),

            Value::Number(n) => format_number(*n, f),

            Value::String(s) => f.write_str(s),

            Value::Callable(callable) => write!(f, "{}", callable),

            Value::Class(class) => f.write_str(&class.name),

            Value::Instance(instance) => write!(f, "{} instance", instance.class.name),
        }
    }
}

/// Largest magnitude below which every integral `f64` is exact.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// `3` rather than `3.0`; fractional values use the shortest round‑trip form.
fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let negative_zero = n == 0.0 && n.is_sign_negative();

    if n.fract() == 0.0 && n.abs() < EXACT_INTEGER_LIMIT && !negative_zero {
        let mut buf = itoa::Buffer::new();
        f.write_str(buf.format(n as i64))
    } else {
        write!(f, "{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(-12.0).to_string(), "-12");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(0.1 + 0.2).to_string(), "0.30000000000000004");
        assert_eq!(Value::Number(-0.0).to_string(), "-0");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
    }

    #[test]
    fn scalar_display_forms() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::string("hi there").to_string(), "hi there");
    }

    #[test]
    fn equality_never_crosses_kinds() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_eq!(Value::string("a"), Value::string("a"));
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_ne!(Value::string("1"), Value::Number(1.0));
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn describe_names_kind_and_value() {
        assert_eq!(Value::string("hi").describe(), "string \"hi\"");
        assert_eq!(Value::Number(4.0).describe(), "number 4");
        assert_eq!(Value::Nil.describe(), "nil");
    }
}
