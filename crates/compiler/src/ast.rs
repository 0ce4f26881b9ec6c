//! Abstract syntax tree for yq programs.
//!
//! Expressions and statements are plain tagged unions; the code generator
//! dispatches on the variant. Assignment left-hand sides are parsed as
//! expressions and then converted to patterns, which is where
//! "assignment to a non-l-value" is rejected.

use yq_core::bytecode::{ActionKind, AssignOp, BinaryOp, UnaryOp};
use yq_core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Str(String),
}

/// One step of a subscript/member chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    /// `.name`
    Member(String),
    /// `[e]`
    Index(Box<Expr>),
    /// `[a:b]`, `[a:]`, `[:b]`, `[:]`
    Slice {
        begin: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    /// The whole argument list, `$`.
    ArgsList,
    /// Shorthand parameter `$0`, `$1`, ...
    NthArg(u32),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// A base with one or more subscripts: `a.b[1][2:]`.
    Access {
        base: Box<Expr>,
        path: Vec<Subscript>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `&&` / `||`; lowered with short-circuit jumps, result is boolean.
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Closure {
        params: Vec<String>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    List(Vec<Pattern>),
    Access {
        base: Box<Expr>,
        path: Vec<Subscript>,
    },
    /// A constant in pattern position asserts equality at runtime.
    Constant(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: Pattern,
        value: Expr,
    },
    Compound {
        target: Pattern,
        op: AssignOp,
        value: Expr,
    },
    Action {
        kind: ActionKind,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    /// Runs only on a program's first activation.
    Init(Box<Stmt>),
    Func {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Expr {
    /// Reinterpret an expression as an assignment target.
    pub fn into_pattern(self) -> Result<Pattern> {
        match self {
            Expr::Ident(name) => Ok(Pattern::Ident(name)),
            Expr::Literal(lit) => Ok(Pattern::Constant(lit)),
            Expr::List(items) => {
                let patterns = items
                    .into_iter()
                    .map(Expr::into_pattern)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Pattern::List(patterns))
            }
            Expr::Access { base, path } => Ok(Pattern::Access { base, path }),
            other => Err(Error::compile(format!(
                "cannot assign to this expression: {}",
                other.describe()
            ))),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "a literal",
            Expr::Ident(_) => "an identifier",
            Expr::ArgsList | Expr::NthArg(_) => "the argument list",
            Expr::List(_) => "a list",
            Expr::Object(_) => "an object literal",
            Expr::Access { .. } => "a subscript",
            Expr::Unary { .. } | Expr::Binary { .. } | Expr::Logical { .. } => "an operator result",
            Expr::Call { .. } => "a call result",
            Expr::Closure { .. } => "a closure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_becomes_pattern() {
        let p = Expr::Ident("x".to_string()).into_pattern().unwrap();
        assert_eq!(p, Pattern::Ident("x".to_string()));
    }

    #[test]
    fn test_nested_list_pattern() {
        let e = Expr::List(vec![
            Expr::Ident("a".to_string()),
            Expr::List(vec![Expr::Ident("b".to_string())]),
            Expr::Literal(Literal::Integer(1)),
        ]);
        let p = e.into_pattern().unwrap();
        assert_eq!(
            p,
            Pattern::List(vec![
                Pattern::Ident("a".to_string()),
                Pattern::List(vec![Pattern::Ident("b".to_string())]),
                Pattern::Constant(Literal::Integer(1)),
            ])
        );
    }

    #[test]
    fn test_call_is_not_an_lvalue() {
        let e = Expr::Call {
            callee: Box::new(Expr::Ident("f".to_string())),
            args: vec![],
        };
        assert!(e.into_pattern().is_err());
    }
}
