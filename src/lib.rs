//! A resolver and tree‑walking evaluator for the Lox scripting language.
//!
//! ```
//! use lox_engine::output::CapturedOutput;
//! use lox_engine::Lox;
//!
//! let out = CapturedOutput::new();
//! let mut lox = Lox::with_output(Box::new(out.clone()));
//! lox.run("print 2 + 1;").unwrap();
//! assert_eq!(out.lines(), vec!["3"]);
//! ```

pub mod ast;
pub mod ast_printer;
pub mod callable;
pub mod class;
pub mod collector;
pub mod environment;
pub mod error;
pub mod interpreter;
pub mod output;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod token;
pub mod value;

use log::info;

use crate::ast::Stmt;
use crate::error::{LoxError, Result};
use crate::interpreter::Interpreter;
use crate::output::OutputSink;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::Scanner;

/// Scans and parses `source` into a program.  Every lexical error is
/// reported; parsing stops at the first syntax error.
pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = Scanner::new(source).scan_all().map_err(LoxError::Static)?;

    Parser::new(&tokens).parse()
}

/// One interpreter session.  Globals defined by one [`Lox::run`] stay
/// visible to the next.
///
/// The resolver's annotations for every program run are kept for the life
/// of the session, since functions declared by an earlier run can still be
/// called.  A long-lived session that runs many distinct programs should be
/// replaced once [`Interpreter::resolved_locals`] grows too large; programs
/// that touch only globals add nothing.
pub struct Lox {
    interpreter: Interpreter,
}

impl Default for Lox {
    fn default() -> Self {
        Lox::new()
    }
}

impl Lox {
    pub fn new() -> Self {
        Lox {
            interpreter: Interpreter::new(),
        }
    }

    pub fn with_output(out: Box<dyn OutputSink>) -> Self {
        Lox {
            interpreter: Interpreter::with_output(out),
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    /// Scans, parses, resolves and executes `source`.  Nothing runs if any
    /// step before execution fails.
    pub fn run(&mut self, source: &str) -> Result<()> {
        let statements = parse(source)?;
        info!("Parsed {} statements", statements.len());

        Resolver::new(&mut self.interpreter).resolve(&statements)?;

        self.interpreter.interpret(&statements)
    }
}
