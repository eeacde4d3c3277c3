//! Centralised error hierarchy for the **Lox engine**.
//!
//! Static failures (scanner, parser, resolver) are reported as [`LoxError`]
//! variants carrying the offending source line.  Failures raised while a
//! program runs are [`RuntimeError`]s; they abort the current top‑level
//! statement sequence and surface through [`LoxError::Runtime`].
//!
//! The module **does not** print diagnostics itself.

use std::io;
use thiserror::Error;

use log::info;

/// Canonical error type used throughout the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoxError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] Error: {message}")]
    Lex {
        /// Human‑readable description.
        message: String,

        /// 1‑based line where the error occurred.
        line: usize,
    },

    /// Syntactic (parser) error.
    #[error("[line {line}] Error: {message}")]
    Parse { message: String, line: usize },

    /// Resolution failure: misplaced `return`/`this`/`super`, reading a local
    /// in its own initializer, duplicate local declaration.
    #[error("[line {line}] Error: {message}")]
    Resolve { message: String, line: usize },

    /// Every static diagnostic found in one program, in source order.
    #[error("{}", render_all(.0))]
    Static(Vec<LoxError>),

    /// Runtime evaluation error.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Wrapper around `std::io::Error` (transparent).  Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// UTF‑8 decoding failure when ingesting external text.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl LoxError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Lex error: line={}, msg={}", line, message);

        LoxError::Lex { message, line }
    }

    /// Helper constructor for the **parser**.
    pub fn parse<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Parse error: line={}, msg={}", line, message);

        LoxError::Parse { message, line }
    }

    /// Helper constructor for the **resolver**.
    pub fn resolve<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Resolve error: line={}, msg={}", line, message);

        LoxError::Resolve { message, line }
    }

    /// Source line of the first diagnostic, if the error has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            LoxError::Lex { line, .. }
            | LoxError::Parse { line, .. }
            | LoxError::Resolve { line, .. } => Some(*line),
            LoxError::Static(errors) => errors.first().and_then(LoxError::line),
            LoxError::Runtime(err) => Some(err.line()),
            _ => None,
        }
    }

    /// Process exit status conventionally associated with this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoxError::Runtime(_) => 70,
            LoxError::Io(_) => 74,
            _ => 65,
        }
    }
}

fn render_all(errors: &[LoxError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failures raised by the evaluator.  Every variant records the line of the
/// expression that triggered it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("[line {line}] Undefined variable '{name}'.")]
    UndefinedVariable { name: String, line: usize },

    #[error("[line {line}] Undefined property '{name}'.")]
    UndefinedProperty { name: String, line: usize },

    /// An operator applied to an operand of the wrong kind.  `found` names
    /// the offending operand.
    #[error("[line {line}] Operand of '{operator}' must be {expected}, got {found}.")]
    TypeMismatch {
        operator: String,
        expected: &'static str,
        found: String,
        line: usize,
    },

    #[error("[line {line}] Can only call functions and classes.")]
    NotCallable { line: usize },

    #[error("[line {line}] Expected {expected} arguments but got {got}.")]
    ArityMismatch {
        expected: usize,
        got: usize,
        line: usize,
    },

    #[error("[line {line}] Superclass must be a class.")]
    InvalidSuperclass { line: usize },

    /// Calls nested deeper than the interpreter allows.
    #[error("[line {line}] Stack overflow.")]
    StackOverflow { line: usize },

    /// A native function reported a failure of its own.
    #[error("[line {line}] Native function '{name}' failed: {message}")]
    Native {
        name: String,
        message: String,
        line: usize,
    },
}

impl RuntimeError {
    pub fn line(&self) -> usize {
        match self {
            RuntimeError::UndefinedVariable { line, .. }
            | RuntimeError::UndefinedProperty { line, .. }
            | RuntimeError::TypeMismatch { line, .. }
            | RuntimeError::NotCallable { line }
            | RuntimeError::ArityMismatch { line, .. }
            | RuntimeError::InvalidSuperclass { line }
            | RuntimeError::StackOverflow { line }
            | RuntimeError::Native { line, .. } => *line,
        }
    }
}

/// Crate‑wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoxError>;
