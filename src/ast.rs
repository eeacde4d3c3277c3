//! Abstract syntax tree consumed by the resolver and the interpreter.
//!
//! Nodes own their names (no borrow of the token buffer) so that function
//! bodies can outlive the source text they were parsed from.  Function
//! declarations sit behind an `Rc` and are shared, never copied, by every
//! runtime function value created from them.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Identity of a variable‑reference node (`Variable`, `Assign`, `This`,
/// `Super`).  Keys the resolver's binding table.
///
/// Ids are unique for the whole process, so programs parsed at different
/// times can share one interpreter without their annotations colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExprId(usize);

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

impl ExprId {
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A name as written in the source, with the line it appeared on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
    pub name: String,
    pub line: usize,
}

impl Ident {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Ident {
            name: name.into(),
            line,
        }
    }
}

/// A **literal constant** that appears directly in the source code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LiteralValue {
    /// Numeric literal, stored as IEEE‑754 `f64`.
    Number(f64),

    /// String literal without surrounding quotes.
    Str(String),

    True,

    False,

    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        }
    }
}

/// **Abstract‑Syntax‑Tree node** representing every kind of *expression*.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Literal {
        value: LiteralValue,
        line: usize,
    },

    /// Parenthesised sub‑expression.
    Grouping(Box<Expr>),

    Unary {
        operator: UnaryOp,
        right: Box<Expr>,
        line: usize,
    },

    /// Strict infix operator; both operands are always evaluated, left first.
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        line: usize,
    },

    /// Short‑circuiting `and` / `or`.
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
    },

    Variable {
        id: ExprId,
        name: Ident,
    },

    Assign {
        id: ExprId,
        name: Ident,
        value: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        /// Line of the closing `)`, used for error reporting.
        line: usize,
        arguments: Vec<Expr>,
    },

    /// `object.name`
    Get { object: Box<Expr>, name: Ident },

    /// `object.name = value`
    Set {
        object: Box<Expr>,
        name: Ident,
        value: Box<Expr>,
    },

    This { id: ExprId, line: usize },

    /// `super.method`
    Super {
        id: ExprId,
        method: Ident,
        line: usize,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Literal { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Call { line, .. }
            | Expr::This { line, .. }
            | Expr::Super { line, .. } => *line,
            Expr::Grouping(inner) => inner.line(),
            Expr::Logical { left, .. } => left.line(),
            Expr::Variable { name, .. } | Expr::Assign { name, .. } => name.line,
            Expr::Get { name, .. } | Expr::Set { name, .. } => name.line,
        }
    }
}

/// A function or method declaration.  Shared by the AST and every function
/// value created from it.
#[derive(Debug, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
}

/// **Abstract‑Syntax‑Tree node** for *statements*.  A program is a sequence
/// of these.  `for` loops never appear here: the parser lowers them to a
/// `Block` around a `While`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Expression(Expr),

    Print(Expr),

    Var {
        name: Ident,
        initializer: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    Function(Rc<FunctionDecl>),

    Class {
        name: Ident,
        /// Always an `Expr::Variable` when present.
        superclass: Option<Expr>,
        methods: Vec<Rc<FunctionDecl>>,
    },

    Return {
        line: usize,
        value: Option<Expr>,
    },
}
