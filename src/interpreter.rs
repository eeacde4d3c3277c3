//! Tree‑walking evaluator.
//!
//! Variable references are looked up by the distance the resolver recorded
//! for them; references the resolver left unannotated are globals and are
//! looked up by name at the moment they are evaluated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::rc::Rc;

use log::{debug, info};
use thiserror::Error;

use crate::ast::{
    BinaryOp, Expr, ExprId, FunctionDecl, Ident, LiteralValue, LogicalOp, Stmt, UnaryOp,
};
use crate::callable::{natives, Callable, Function};
use crate::class::{bind, Instance, LoxClass, INITIALIZER};
use crate::collector::Collector;
use crate::environment::{EnvRef, Environment};
use crate::error::{LoxError, RuntimeError};
use crate::output::{OutputSink, Stdout};
use crate::value::Value;

/// Ways evaluation can stop early.
#[derive(Error, Debug)]
pub enum InterpretError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Unwinds from a `return` to the nearest call boundary.  Blocks and
    /// loops pass it through untouched.
    #[error("Return signal with value: {0}")]
    ReturnSignal(Value),

    /// The output sink failed.
    #[error(transparent)]
    Output(#[from] io::Error),
}

/// Convenient alias for interpreter results.
pub type IResult<T> = Result<T, InterpretError>;

/// Deepest nesting of user function calls before `StackOverflow`.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Native stack that must remain before a call runs its body, and the size
/// of each segment allocated when it does not.
const RED_ZONE: usize = 100 * 1024;
const STACK_PER_CALL: usize = 1024 * 1024;

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    locals: HashMap<ExprId, usize>,
    out: Box<dyn OutputSink>,
    collector: Collector,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    /// Interpreter printing to standard output.
    pub fn new() -> Self {
        Interpreter::with_output(Box::new(Stdout))
    }

    /// Creates an interpreter writing `print` output to `out`, with the
    /// native functions such as `clock` defined as globals.
    pub fn with_output(out: Box<dyn OutputSink>) -> Self {
        info!("Initializing Interpreter");

        let globals = Rc::new(RefCell::new(Environment::new()));

        for native in natives() {
            debug!("Defining native function '{}'", native.name);

            globals
                .borrow_mut()
                .define(native.name, Value::Callable(Callable::Native(Rc::new(native))));
        }

        let mut collector = Collector::new();
        collector.track(&globals);

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
            collector,
            call_depth: 0,
        }
    }

    pub fn globals(&self) -> &EnvRef {
        &self.globals
    }

    /// Records that the reference `id` binds `depth` scopes above the scope
    /// it is evaluated in.  Called by the resolver.
    ///
    /// Entries are never removed: a function declared by one run may be
    /// called by any later run of the same session, and its body's
    /// references are looked up here.  The table grows by one entry per
    /// resolved local reference, `this` or `super` in each program run.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        self.locals.insert(id, depth);
    }

    /// Number of resolved local references recorded so far.
    pub fn resolved_locals(&self) -> usize {
        self.locals.len()
    }

    /// Environments created by this interpreter that are still allocated,
    /// the global scope included.
    pub fn live_environments(&self) -> usize {
        self.collector.live_environments()
    }

    /// Frees scopes kept alive only by closures stored inside them.  Runs
    /// on its own as scopes accumulate; returns how many were reclaimed.
    pub fn collect_cycles(&mut self) -> usize {
        self.collector.collect()
    }

    /// New scope enclosed by `enclosing`, tracked for cycle collection.
    fn new_scope(&mut self, enclosing: EnvRef) -> EnvRef {
        if self.collector.should_collect() {
            self.collector.collect();
        }

        let scope = Rc::new(RefCell::new(Environment::with_enclosing(enclosing)));
        self.collector.track(&scope);
        scope
    }

    /// Interprets a resolved program.
    pub fn interpret(&mut self, statements: &[Stmt]) -> crate::error::Result<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            match self.execute(stmt) {
                Ok(()) => {}
                Err(InterpretError::Runtime(e)) => {
                    debug!("Runtime error: {}", e);
                    return Err(LoxError::Runtime(e));
                }
                Err(InterpretError::Output(e)) => return Err(LoxError::Io(e)),
                // The resolver rejects `return` outside a function.
                Err(InterpretError::ReturnSignal(_)) => return Ok(()),
            }
        }

        info!("Interpretation completed successfully");

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    pub fn execute(&mut self, stmt: &Stmt) -> IResult<()> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                let text = value.to_string();
                debug!("Printing: {}", text);
                self.out.write_line(&text)?;
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Defining variable '{}' = {}", name.name, value);
                self.environment.borrow_mut().define(&name.name, value);
            }

            Stmt::Block(statements) => {
                let scope = self.new_scope(Rc::clone(&self.environment));
                self.execute_block(statements, scope)?;
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }
            }

            Stmt::While { condition, body } => {
                while is_truthy(&self.evaluate(condition)?) {
                    self.execute(body)?;
                }
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name.name);
                let function = Function::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                );
                self.environment.borrow_mut().define(
                    &declaration.name.name,
                    Value::Callable(Callable::Function(Rc::new(function))),
                );
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.declare_class(name, superclass.as_ref(), methods)?,

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Returning value: {}", value);
                return Err(InterpretError::ReturnSignal(value));
            }
        }

        Ok(())
    }

    /// Runs `statements` with `scope` as the current environment, restoring
    /// the previous environment however the block exits.
    pub fn execute_block(&mut self, statements: &[Stmt], scope: EnvRef) -> IResult<()> {
        let previous = mem::replace(&mut self.environment, scope);

        let result = statements.iter().try_for_each(|stmt| self.execute(stmt));

        self.environment = previous;

        result
    }

    fn declare_class(
        &mut self,
        name: &Ident,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> IResult<()> {
        debug!("Declaring class '{}'", name.name);

        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    return Err(RuntimeError::InvalidSuperclass { line: expr.line() }.into());
                }
            },
            None => None,
        };

        // Methods of a subclass close over an extra scope holding `super`.
        let method_env = match &superclass {
            Some(class) => {
                let scope = self.new_scope(Rc::clone(&self.environment));
                scope
                    .borrow_mut()
                    .define("super", Value::Class(Rc::clone(class)));
                scope
            }
            None => Rc::clone(&self.environment),
        };

        let table = methods
            .iter()
            .map(|decl| {
                let function = Function::new(
                    Rc::clone(decl),
                    Rc::clone(&method_env),
                    decl.name.name == INITIALIZER,
                );
                (decl.name.name.clone(), Rc::new(function))
            })
            .collect();

        let class = LoxClass::new(name.name.clone(), superclass, table);

        self.environment
            .borrow_mut()
            .define(&name.name, Value::Class(Rc::new(class)));

        info!("Class '{}' defined with {} method(s)", name.name, methods.len());

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn evaluate(&mut self, expr: &Expr) -> IResult<Value> {
        let value = match expr {
            Expr::Literal { value, .. } => evaluate_literal(value),

            Expr::Grouping(inner) => self.evaluate(inner)?,

            Expr::Unary {
                operator,
                right,
                line,
            } => self.evaluate_unary(*operator, right, *line)?,

            Expr::Binary {
                left,
                operator,
                right,
                line,
            } => self.evaluate_binary(left, *operator, right, *line)?,

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_val = self.evaluate(left)?;

                let short_circuit = match operator {
                    LogicalOp::Or => is_truthy(&left_val),
                    LogicalOp::And => !is_truthy(&left_val),
                };

                if short_circuit {
                    left_val
                } else {
                    self.evaluate(right)?
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name)?,

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                self.assign_variable(*id, name, value.clone())?;
                value
            }

            Expr::Call {
                callee,
                line,
                arguments,
            } => {
                let callee_val = self.evaluate(callee)?;

                let mut arg_values = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_values.push(self.evaluate(arg)?);
                }

                self.invoke_callable(callee_val, arg_values, *line)?
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => {
                    instance
                        .get(&name.name)
                        .ok_or_else(|| RuntimeError::UndefinedProperty {
                            name: name.name.clone(),
                            line: name.line,
                        })?
                }
                other => return Err(not_an_instance(&other, name.line)),
            },

            Expr::Set {
                object,
                name,
                value,
            } => {
                let instance = match self.evaluate(object)? {
                    Value::Instance(instance) => instance,
                    other => return Err(not_an_instance(&other, name.line)),
                };

                let value = self.evaluate(value)?;
                instance.set(&name.name, value.clone());
                value
            }

            Expr::This { id, line } => {
                self.look_up_variable(*id, &Ident::new("this", *line))?
            }

            Expr::Super { id, method, line } => self.evaluate_super(*id, method, *line)?,
        };

        Ok(value)
    }

    fn evaluate_unary(&mut self, operator: UnaryOp, right: &Expr, line: usize) -> IResult<Value> {
        let right_val = self.evaluate(right)?;

        match operator {
            UnaryOp::Negate => match right_val {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(type_mismatch(operator.symbol(), "a number", &other, line)),
            },
            UnaryOp::Not => Ok(Value::Bool(!is_truthy(&right_val))),
        }
    }

    fn evaluate_binary(
        &mut self,
        left: &Expr,
        operator: BinaryOp,
        right: &Expr,
        line: usize,
    ) -> IResult<Value> {
        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;

        debug!(
            "Binary {}: left={}, right={}",
            operator.symbol(),
            left_val,
            right_val
        );

        let symbol = operator.symbol();
        let numbers = || number_operands(symbol, &left_val, &right_val, line);

        let value = match operator {
            BinaryOp::Add => match (&left_val, &right_val) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                (Value::String(a), Value::String(b)) => {
                    let mut joined = String::with_capacity(a.len() + b.len());
                    joined.push_str(a);
                    joined.push_str(b);
                    Value::string(joined)
                }
                // Blame the operand that breaks both the number and the
                // string reading.
                (Value::Number(_), other) | (Value::String(_), other) => {
                    return Err(type_mismatch(
                        symbol,
                        "two numbers or two strings",
                        other,
                        line,
                    ));
                }
                (other, _) => {
                    return Err(type_mismatch(
                        symbol,
                        "two numbers or two strings",
                        other,
                        line,
                    ));
                }
            },

            BinaryOp::Equal => Value::Bool(left_val == right_val),
            BinaryOp::NotEqual => Value::Bool(left_val != right_val),

            BinaryOp::Subtract => {
                let (a, b) = numbers()?;
                Value::Number(a - b)
            }
            BinaryOp::Multiply => {
                let (a, b) = numbers()?;
                Value::Number(a * b)
            }
            BinaryOp::Divide => {
                let (a, b) = numbers()?;
                Value::Number(a / b)
            }
            BinaryOp::Less => {
                let (a, b) = numbers()?;
                Value::Bool(a < b)
            }
            BinaryOp::LessEqual => {
                let (a, b) = numbers()?;
                Value::Bool(a <= b)
            }
            BinaryOp::Greater => {
                let (a, b) = numbers()?;
                Value::Bool(a > b)
            }
            BinaryOp::GreaterEqual => {
                let (a, b) = numbers()?;
                Value::Bool(a >= b)
            }
        };

        Ok(value)
    }

    fn look_up_variable(&self, id: ExprId, name: &Ident) -> IResult<Value> {
        let found = match self.locals.get(&id) {
            Some(&distance) => self.environment.borrow().get_at(distance, &name.name),
            None => self.globals.borrow().get(&name.name),
        };

        found.ok_or_else(|| {
            InterpretError::from(RuntimeError::UndefinedVariable {
                name: name.name.clone(),
                line: name.line,
            })
        })
    }

    fn assign_variable(&mut self, id: ExprId, name: &Ident, value: Value) -> IResult<()> {
        let assigned = match self.locals.get(&id) {
            Some(&distance) => {
                self.environment
                    .borrow_mut()
                    .assign_at(distance, &name.name, value)
            }
            None => self.globals.borrow_mut().assign(&name.name, value),
        };

        if assigned {
            Ok(())
        } else {
            Err(RuntimeError::UndefinedVariable {
                name: name.name.clone(),
                line: name.line,
            }
            .into())
        }
    }

    /// `super.method`: look the method up starting at the superclass bound
    /// in the method's closure, and bind it to the current `this`.
    fn evaluate_super(&mut self, id: ExprId, method: &Ident, line: usize) -> IResult<Value> {
        let distance = self.locals.get(&id).copied().ok_or_else(|| {
            RuntimeError::UndefinedVariable {
                name: "super".to_string(),
                line,
            }
        })?;

        let superclass = self.environment.borrow().get_at(distance, "super");
        // `this` lives in the scope just inside the one holding `super`.
        let receiver = distance
            .checked_sub(1)
            .and_then(|d| self.environment.borrow().get_at(d, "this"));

        let (Some(Value::Class(superclass)), Some(Value::Instance(receiver))) =
            (superclass, receiver)
        else {
            return Err(RuntimeError::UndefinedVariable {
                name: "super".to_string(),
                line,
            }
            .into());
        };

        let found = superclass.find_method(&method.name).ok_or_else(|| {
            RuntimeError::UndefinedProperty {
                name: method.name.clone(),
                line: method.line,
            }
        })?;

        Ok(bind(found, receiver))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    /// Invokes a callable (native, user‑defined, bound method) or
    /// instantiates a class.
    fn invoke_callable(&mut self, callee: Value, args: Vec<Value>, line: usize) -> IResult<Value> {
        match callee {
            Value::Callable(callable) => {
                check_arity(callable.arity(), args.len(), line)?;

                match callable {
                    Callable::Native(native) => {
                        debug!("Calling native function '{}'", native.name);

                        (native.func)(&args).map_err(|message| {
                            InterpretError::from(RuntimeError::Native {
                                name: native.name.to_string(),
                                message,
                                line,
                            })
                        })
                    }

                    Callable::Function(function) => {
                        self.call_function(&function, args, None, line)
                    }

                    Callable::BoundMethod(bound) => {
                        self.call_function(&bound.method, args, Some(&bound.receiver), line)
                    }
                }
            }

            Value::Class(class) => {
                check_arity(class.arity(), args.len(), line)?;

                debug!("Instantiating class '{}'", class.name);
                let instance = Rc::new(Instance::new(Rc::clone(&class)));
                self.collector.track_instance(&instance);

                if let Some(init) = class.find_method(INITIALIZER) {
                    self.call_function(&init, args, Some(&instance), line)?;
                }

                Ok(Value::Instance(instance))
            }

            _ => Err(RuntimeError::NotCallable { line }.into()),
        }
    }

    /// Runs a user function body in a fresh frame enclosing its closure.
    /// With a receiver, a frame binding `this` sits between the two.
    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        receiver: Option<&Rc<Instance>>,
        line: usize,
    ) -> IResult<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            debug!(
                "Call to '{}' exceeds depth {}",
                function.name(),
                MAX_CALL_DEPTH
            );
            return Err(RuntimeError::StackOverflow { line }.into());
        }

        debug!("Calling function '{}'", function.name());

        let parent = match receiver {
            Some(instance) => {
                let this_scope = self.new_scope(Rc::clone(&function.closure));
                this_scope
                    .borrow_mut()
                    .define("this", Value::Instance(Rc::clone(instance)));
                this_scope
            }
            None => Rc::clone(&function.closure),
        };

        let frame = self.new_scope(parent);
        {
            let mut frame = frame.borrow_mut();
            for (param, arg) in function.declaration.params.iter().zip(args) {
                frame.define(&param.name, arg);
            }
        }

        self.call_depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_PER_CALL, || {
            self.execute_block(&function.declaration.body, frame)
        });
        self.call_depth -= 1;

        let returned = match result {
            Ok(()) => Value::Nil,
            Err(InterpretError::ReturnSignal(value)) => value,
            Err(e) => return Err(e),
        };

        if function.is_initializer {
            if let Some(instance) = receiver {
                return Ok(Value::Instance(Rc::clone(instance)));
            }
        }

        debug!("Function '{}' returned: {}", function.name(), returned);

        Ok(returned)
    }
}

fn evaluate_literal(literal: &LiteralValue) -> Value {
    match literal {
        LiteralValue::Number(n) => Value::Number(*n),
        LiteralValue::Str(s) => Value::string(s.as_str()),
        LiteralValue::True => Value::Bool(true),
        LiteralValue::False => Value::Bool(false),
        LiteralValue::Nil => Value::Nil,
    }
}

/// `nil` and `false` are falsy; everything else, `0` and `""` included, is
/// truthy.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Bool(false))
}

fn number_operands(
    operator: &str,
    left: &Value,
    right: &Value,
    line: usize,
) -> IResult<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        (Value::Number(_), other) | (other, _) => {
            Err(type_mismatch(operator, "numbers", other, line))
        }
    }
}

fn type_mismatch(operator: &str, expected: &'static str, found: &Value, line: usize) -> InterpretError {
    RuntimeError::TypeMismatch {
        operator: operator.to_string(),
        expected,
        found: found.describe(),
        line,
    }
    .into()
}

fn not_an_instance(value: &Value, line: usize) -> InterpretError {
    type_mismatch(".", "an instance", value, line)
}

fn check_arity(expected: usize, got: usize, line: usize) -> IResult<()> {
    if expected == got {
        Ok(())
    } else {
        debug!("Arity mismatch: expected {}, got {}", expected, got);
        Err(RuntimeError::ArityMismatch {
            expected,
            got,
            line,
        }
        .into())
    }
}
