//! Capture analysis for closures.
//!
//! Before a function body is compiled, this pass determines which names
//! it captures from enclosing function scopes. A name is a capture when
//! it is referenced anywhere in the body (including inside nested
//! closures) without being bound along the way, and it resolves to a
//! local of an enclosing function at the point the closure is compiled.
//!
//! Captures are returned in order of first occurrence; the code generator
//! gives them the low frame slots right below the parameters, and emits
//! the capture list at the creation site in the same order.
//!
//! Assignment decides binding: writing a name that does not resolve
//! outward declares a fresh local, writing one that does resolve outward
//! goes through the capture; there is no shadowing of an enclosing
//! local by plain assignment.

use crate::ast::{Expr, Pattern, Stmt, Subscript};
use std::collections::HashSet;

pub fn collect_captures(
    params: &[String],
    body: &[Stmt],
    is_enclosing_local: &dyn Fn(&str) -> bool,
) -> Vec<String> {
    let mut walker = Walker {
        bound: params.iter().cloned().collect(),
        captures: Vec::new(),
        is_enclosing_local,
    };
    walker.walk_stmts(body);
    walker.captures
}

struct Walker<'a> {
    bound: HashSet<String>,
    captures: Vec<String>,
    is_enclosing_local: &'a dyn Fn(&str) -> bool,
}

impl Walker<'_> {
    fn reference(&mut self, name: &str) {
        if self.bound.contains(name) {
            return;
        }
        if (self.is_enclosing_local)(name) && !self.captures.iter().any(|c| c == name) {
            self.captures.push(name.to_string());
        }
    }

    /// An assignment target: a capture write when the name resolves
    /// outward, a fresh local binding otherwise.
    fn bind(&mut self, name: &str) {
        if self.bound.contains(name) {
            return;
        }
        if (self.is_enclosing_local)(name) {
            self.reference(name);
        } else {
            self.bound.insert(name.to_string());
        }
    }

    fn walk_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.walk_expr(e),
            Stmt::Assign { target, value } => {
                self.walk_expr(value);
                self.walk_pattern(target, true);
            }
            Stmt::Compound { target, value, .. } => {
                self.walk_expr(value);
                // Compound assignment reads and writes an existing cell;
                // it never declares.
                self.walk_pattern(target, false);
            }
            Stmt::Action { value, .. } => self.walk_expr(value),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(cond);
                self.walk_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.walk_stmt(e);
                }
            }
            Stmt::While { cond, body } => {
                self.walk_expr(cond);
                self.walk_stmt(body);
            }
            Stmt::For {
                pattern,
                iterable,
                body,
            } => {
                self.walk_expr(iterable);
                self.walk_pattern(pattern, true);
                self.walk_stmt(body);
            }
            Stmt::Init(inner) => self.walk_stmt(inner),
            Stmt::Func { name, params, body } => {
                self.bind(name);
                self.walk_nested(params, body);
            }
            Stmt::Return(value) => {
                if let Some(e) = value {
                    self.walk_expr(e);
                }
            }
            Stmt::Break | Stmt::Continue => {}
            Stmt::Block(stmts) => self.walk_stmts(stmts),
        }
    }

    fn walk_pattern(&mut self, pattern: &Pattern, binding: bool) {
        match pattern {
            Pattern::Ident(name) => {
                if binding {
                    self.bind(name);
                } else {
                    self.reference(name);
                }
            }
            Pattern::List(items) => {
                for p in items {
                    self.walk_pattern(p, binding);
                }
            }
            Pattern::Access { base, path } => {
                self.walk_expr(base);
                self.walk_path(path);
            }
            Pattern::Constant(_) => {}
        }
    }

    fn walk_path(&mut self, path: &[Subscript]) {
        for s in path {
            match s {
                Subscript::Member(_) => {}
                Subscript::Index(e) => self.walk_expr(e),
                Subscript::Slice { begin, end } => {
                    if let Some(e) = begin {
                        self.walk_expr(e);
                    }
                    if let Some(e) = end {
                        self.walk_expr(e);
                    }
                }
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) | Expr::ArgsList | Expr::NthArg(_) => {}
            Expr::Ident(name) => self.reference(name),
            Expr::List(items) => {
                for e in items {
                    self.walk_expr(e);
                }
            }
            Expr::Object(entries) => {
                for (_, e) in entries {
                    self.walk_expr(e);
                }
            }
            Expr::Access { base, path } => {
                self.walk_expr(base);
                self.walk_path(path);
            }
            Expr::Unary { operand, .. } => self.walk_expr(operand),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            Expr::Call { callee, args } => {
                self.walk_expr(callee);
                for e in args {
                    self.walk_expr(e);
                }
            }
            Expr::Closure { params, body } => self.walk_nested(params, body),
        }
    }

    /// A nested closure's params shadow, its free names still count
    /// toward our captures.
    fn walk_nested(&mut self, params: &[String], body: &[Stmt]) {
        let saved = self.bound.clone();
        for p in params {
            self.bound.insert(p.clone());
        }
        self.walk_stmts(body);
        self.bound = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn captures_of(source: &str, enclosing: &[&str]) -> Vec<String> {
        let program = parse(source).unwrap();
        let enclosing: HashSet<String> = enclosing.iter().map(|s| s.to_string()).collect();
        collect_captures(&[], &program.body, &|name| enclosing.contains(name))
    }

    #[test]
    fn test_plain_reference_captures() {
        assert_eq!(captures_of("say x", &["x"]), vec!["x"]);
    }

    #[test]
    fn test_local_assignment_shadows_nothing_outward() {
        // `y` is fresh here, so it binds locally; `x` resolves outward.
        assert_eq!(captures_of("y = 1; x += y", &["x"]), vec!["x"]);
    }

    #[test]
    fn test_write_to_enclosing_local_is_a_capture() {
        assert_eq!(captures_of("x = x + 1", &["x"]), vec!["x"]);
    }

    #[test]
    fn test_fresh_binding_before_use_is_local() {
        assert_eq!(captures_of("t = 0; say t", &["x"]), Vec::<String>::new());
    }

    #[test]
    fn test_nested_closures_propagate() {
        let caps = captures_of("f = { $0 + x }", &["x"]);
        assert_eq!(caps, vec!["x"]);
    }

    #[test]
    fn test_nested_params_shadow() {
        let caps = captures_of("f = { x -> x + 1 }", &["x"]);
        assert_eq!(caps, Vec::<String>::new());
    }

    #[test]
    fn test_order_is_first_occurrence() {
        assert_eq!(captures_of("say b + a; say a", &["a", "b"]), vec!["b", "a"]);
    }

    #[test]
    fn test_globals_are_not_captures() {
        assert_eq!(captures_of("say g; x += 1", &["x"]), vec!["x"]);
    }
}
