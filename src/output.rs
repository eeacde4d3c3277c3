//! Where `print` writes.  One call per printed line, without the newline.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

pub trait OutputSink {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Writes each line to standard output.
#[derive(Debug, Default)]
pub struct Stdout;

impl OutputSink for Stdout {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", line)
    }
}

/// Records printed lines in memory.  Clones share the same buffer, so a
/// caller can keep one handle and give the other to the interpreter.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    lines: Rc<RefCell<Vec<String>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        CapturedOutput::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl OutputSink for CapturedOutput {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.borrow_mut().push(line.to_string());
        Ok(())
    }
}
