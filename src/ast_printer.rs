use crate::ast::{Expr, FunctionDecl, LiteralValue, Stmt};

/// Renders the syntax tree in parenthesised prefix form, e.g.
/// `(var a = (+ 1 2))`.  Nested statements are concatenated without a
/// separator; top‑level statements go one per line.
pub struct AstPrinter;

impl AstPrinter {
    pub fn program(statements: &[Stmt]) -> String {
        statements
            .iter()
            .map(Self::stmt)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stmt(stmt: &Stmt) -> String {
        match stmt {
            Stmt::Expression(expr) => format!("(; {})", Self::print(expr)),

            Stmt::Print(expr) => format!("(print {})", Self::print(expr)),

            Stmt::Var { name, initializer } => match initializer {
                Some(init) => format!("(var {} = {})", name.name, Self::print(init)),
                None => format!("(var {})", name.name),
            },

            Stmt::Block(statements) => format!("(block {})", Self::concat(statements)),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(else_branch) => format!(
                    "(if-else {} {} {})",
                    Self::print(condition),
                    Self::stmt(then_branch),
                    Self::stmt(else_branch)
                ),
                None => format!(
                    "(if {} {})",
                    Self::print(condition),
                    Self::stmt(then_branch)
                ),
            },

            Stmt::While { condition, body } => {
                format!("(while {} {})", Self::print(condition), Self::stmt(body))
            }

            Stmt::Function(decl) => Self::function(decl),

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let mut s = format!("(class {}", name.name);
                if let Some(superclass) = superclass {
                    s.push_str(" < ");
                    s.push_str(&Self::print(superclass));
                }
                s.push(' ');
                for method in methods {
                    s.push_str(&Self::function(method));
                }
                s.push(')');
                s
            }

            Stmt::Return { value, .. } => match value {
                Some(value) => format!("(return {})", Self::print(value)),
                None => "(return)".into(),
            },
        }
    }

    pub fn print(expr: &Expr) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal { value, .. } => match value {
                LiteralValue::True => "true".into(),
                LiteralValue::False => "false".into(),
                LiteralValue::Nil => "nil".into(),
                LiteralValue::Str(s) => s.clone(),
                LiteralValue::Number(n) => n.to_string(),
            },

            Expr::Grouping(inner) => format!("(group {})", Self::print(inner)),

            Expr::Unary {
                operator, right, ..
            } => format!("({} {})", operator.symbol(), Self::print(right)),

            Expr::Binary {
                left,
                operator,
                right,
                ..
            } => format!(
                "({} {} {})",
                operator.symbol(),
                Self::print(left),
                Self::print(right)
            ),

            Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.symbol(),
                Self::print(left),
                Self::print(right)
            ),

            // ── variables / calls / properties ──────────────────────────
            Expr::Variable { name, .. } => name.name.clone(),

            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.name, Self::print(value))
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                let mut s = format!("(call {}", Self::print(callee));
                for arg in arguments {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }
                s.push(')');
                s
            }

            Expr::Get { object, name } => format!("(. {} {})", Self::print(object), name.name),

            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(= {} {} {})",
                Self::print(object),
                name.name,
                Self::print(value)
            ),

            Expr::This { .. } => "this".into(),

            Expr::Super { method, .. } => format!("(super {})", method.name),
        }
    }

    fn function(decl: &FunctionDecl) -> String {
        let params: Vec<&str> = decl.params.iter().map(|p| p.name.as_str()).collect();

        format!(
            "(fun {} ({}) {})",
            decl.name.name,
            params.join(" "),
            Self::concat(&decl.body)
        )
    }

    fn concat(statements: &[Stmt]) -> String {
        statements.iter().map(Self::stmt).collect()
    }
}
