//! Bytecode generation.
//!
//! The generator walks the AST once, emitting into a flat text vector and
//! patching forward labels afterwards through the label table. Scope
//! handling follows the frame layout the VM expects: frame offset 0 is
//! the caller, 1 the argument list, then capture slots in analysis order,
//! then parameters and declared locals. `PREPARE_FRAME`'s operand (the
//! number of cells to reserve) is back-patched once the body has been
//! compiled and every local is known.
//!
//! Top-level bindings, including `for` variables, live in the static
//! region and are recorded in the symbol table; that is what makes them
//! survive in a memory image. Event variables are pre-seeded so host
//! bindings always have a slot to land in.

use crate::ast::{Expr, Literal, LogicalOp, Pattern, Program, Stmt, Subscript};
use crate::captures::collect_captures;
use std::collections::{HashMap, HashSet};
use yq_core::builtin::Builtin;
use yq_core::bytecode::{AssignOp, ByteCode, Imm, OpCode, SubscriptKind};
use yq_core::error::{Error, Result};
use yq_core::memory::Memory;
use yq_core::pointer::Pointer;
use yq_core::value::{Collection, Entry, Ref, Value};

/// Variables the host binds before each activation. Absent events are
/// left `null`.
pub const EVENT_GLOBALS: &[&str] = &["text", "sender", "clock", "nudged", "images"];

/// Placeholder for a label that has not been marked yet.
const UNPATCHED: usize = usize::MAX;

/// Frame offsets 0 and 1 are the caller and the argument list.
const FIRST_NAMED_OFFSET: u32 = 2;
const ARGS_OFFSET: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Int(i64),
    Str(String),
}

struct FunctionScope {
    locals: HashMap<String, u32>,
    next_offset: u32,
    capture_count: u32,
}

struct LoopCtx {
    continue_label: u32,
    break_label: u32,
    scope_depth: usize,
}

enum Resolved {
    Local(u32),
    Global(Pointer),
}

pub struct CodeGen {
    text: Vec<ByteCode>,
    labels: Vec<usize>,
    statics: Vec<Value>,
    symbols: HashMap<String, Pointer>,
    literals: HashMap<LiteralKey, Pointer>,
    scopes: Vec<FunctionScope>,
    loops: Vec<LoopCtx>,
}

/// Lower a parsed program to an executable memory.
pub fn generate(program: &Program) -> Result<Memory> {
    let mut g = CodeGen::new();
    for name in EVENT_GLOBALS {
        g.declare_global(name);
    }
    g.compile_stmts(&program.body)?;
    g.emit0(OpCode::Exit);
    g.finish()
}

impl CodeGen {
    fn new() -> Self {
        CodeGen {
            text: Vec::new(),
            labels: Vec::new(),
            statics: Vec::new(),
            symbols: HashMap::new(),
            literals: HashMap::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn finish(self) -> Result<Memory> {
        if let Some(id) = self.labels.iter().position(|&i| i == UNPATCHED) {
            return Err(Error::internal(format!("label L{} was never marked", id)));
        }
        Ok(Memory::from_parts(
            self.text,
            self.labels,
            self.statics,
            self.symbols,
        ))
    }

    // ---- emission helpers ------------------------------------------------

    fn emit(&mut self, op: OpCode, operand: u32) {
        self.text.push(ByteCode::new(op, operand));
    }

    fn emit0(&mut self, op: OpCode) {
        self.text.push(ByteCode::plain(op));
    }

    fn new_label(&mut self) -> u32 {
        self.labels.push(UNPATCHED);
        (self.labels.len() - 1) as u32
    }

    fn mark(&mut self, label: u32) {
        self.labels[label as usize] = self.text.len();
    }

    // ---- statics and symbols ---------------------------------------------

    fn literal_static(&mut self, key: LiteralKey) -> Pointer {
        if let Some(p) = self.literals.get(&key) {
            return *p;
        }
        let value = match &key {
            LiteralKey::Int(n) => Value::Integer(*n),
            LiteralKey::Str(s) => {
                Value::Reference(Ref::Pending(Box::new(Collection::String(s.clone()))))
            }
        };
        let p = self.push_static(value);
        self.literals.insert(key, p);
        p
    }

    fn push_static(&mut self, v: Value) -> Pointer {
        let p = Pointer::static_slot(self.statics.len() as u32);
        self.statics.push(v);
        p
    }

    fn declare_global(&mut self, name: &str) -> Pointer {
        if let Some(p) = self.symbols.get(name) {
            return *p;
        }
        let p = self.push_static(Value::Null);
        self.symbols.insert(name.to_string(), p);
        p
    }

    /// Resolve a name for reading: innermost locals (captures included),
    /// then globals, then the builtin registry.
    fn resolve(&mut self, name: &str) -> Option<Resolved> {
        if let Some(scope) = self.scopes.last()
            && let Some(off) = scope.locals.get(name)
        {
            return Some(Resolved::Local(*off));
        }
        if let Some(p) = self.symbols.get(name) {
            return Some(Resolved::Global(*p));
        }
        if let Some(b) = Builtin::from_global_name(name) {
            let closure = Value::Closure {
                captures: Ref::Pending(Box::new(Collection::List(Vec::new()))),
                entry: Entry::Builtin(b),
            };
            let p = self.push_static(closure);
            self.symbols.insert(name.to_string(), p);
            return Some(Resolved::Global(p));
        }
        None
    }

    /// Pop the top of stack into `name`, declaring it if needed: a local
    /// inside a function, a named static at top level.
    fn store_ident(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(off) = scope.locals.get(name) {
                let off = *off;
                self.emit(OpCode::PopSaveLocal, off);
                return;
            }
            if let Some(p) = self.symbols.get(name) {
                let bits = p.bits();
                self.emit(OpCode::PopSave, bits);
                return;
            }
            let off = scope.next_offset;
            scope.next_offset += 1;
            scope.locals.insert(name.to_string(), off);
            self.emit(OpCode::PopSaveLocal, off);
        } else {
            let p = self.declare_global(name);
            self.emit(OpCode::PopSave, p.bits());
        }
    }

    // ---- statements ------------------------------------------------------

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                // Expression statements feed the implicit-return register.
                self.emit0(OpCode::PopSaveToReg);
            }
            Stmt::Assign { target, value } => {
                self.compile_assign(target, value)?;
            }
            Stmt::Compound { target, op, value } => {
                self.compile_compound(target, *op, value)?;
            }
            Stmt::Action { kind, value } => {
                self.compile_expr(value)?;
                self.emit(OpCode::Action, kind.code());
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(cond)?;
                let l_else = self.new_label();
                self.emit(OpCode::JumpZero, l_else);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let l_end = self.new_label();
                        self.emit(OpCode::Jump, l_end);
                        self.mark(l_else);
                        self.compile_stmt(else_branch)?;
                        self.mark(l_end);
                    }
                    None => self.mark(l_else),
                }
            }
            Stmt::While { cond, body } => {
                let l_top = self.new_label();
                let l_end = self.new_label();
                self.mark(l_top);
                self.compile_expr(cond)?;
                self.emit(OpCode::JumpZero, l_end);
                self.loops.push(LoopCtx {
                    continue_label: l_top,
                    break_label: l_end,
                    scope_depth: self.scopes.len(),
                });
                self.compile_stmt(body)?;
                self.loops.pop();
                self.emit(OpCode::Jump, l_top);
                self.mark(l_end);
            }
            Stmt::For {
                pattern,
                iterable,
                body,
            } => {
                self.compile_expr(iterable)?;
                self.emit0(OpCode::PushIterator);
                let l_top = self.new_label();
                let l_end = self.new_label();
                self.mark(l_top);
                self.emit(OpCode::JumpIfIterDone, l_end);
                self.emit0(OpCode::IterNextPush);
                self.bind_pattern(pattern)?;
                self.loops.push(LoopCtx {
                    continue_label: l_top,
                    break_label: l_end,
                    scope_depth: self.scopes.len(),
                });
                self.compile_stmt(body)?;
                self.loops.pop();
                self.emit(OpCode::Jump, l_top);
                self.mark(l_end);
                self.emit0(OpCode::PopIterator);
            }
            Stmt::Init(inner) => {
                let l_skip = self.new_label();
                self.emit(OpCode::JumpNotFirstRun, l_skip);
                self.compile_stmt(inner)?;
                self.mark(l_skip);
            }
            Stmt::Func { name, params, body } => {
                // Declare first so the body can call itself: the cell
                // exists (and is capturable) before the closure value
                // lands in it.
                if self.scopes.is_empty() {
                    self.declare_global(name);
                } else if let Some(scope) = self.scopes.last_mut()
                    && !scope.locals.contains_key(name)
                {
                    let off = scope.next_offset;
                    scope.next_offset += 1;
                    scope.locals.insert(name.clone(), off);
                }
                self.compile_closure(params, body)?;
                self.store_ident(name);
            }
            Stmt::Return(value) => {
                if self.scopes.is_empty() {
                    return Err(Error::compile("'return' outside a function"));
                }
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit(OpCode::PushImm, Imm::Null.code()),
                }
                self.emit0(OpCode::PopReturn);
            }
            Stmt::Break => {
                let ctx = self.innermost_loop("break")?;
                self.emit(OpCode::Jump, ctx);
            }
            Stmt::Continue => {
                let ctx = match self.loops.last() {
                    Some(ctx) if ctx.scope_depth == self.scopes.len() => ctx.continue_label,
                    _ => return Err(Error::compile("'continue' outside a loop")),
                };
                self.emit(OpCode::Jump, ctx);
            }
            Stmt::Block(stmts) => self.compile_stmts(stmts)?,
        }
        Ok(())
    }

    fn innermost_loop(&self, what: &str) -> Result<u32> {
        match self.loops.last() {
            Some(ctx) if ctx.scope_depth == self.scopes.len() => Ok(ctx.break_label),
            _ => Err(Error::compile(format!("'{}' outside a loop", what))),
        }
    }

    fn compile_assign(&mut self, target: &Pattern, value: &Expr) -> Result<()> {
        match target {
            Pattern::Access { base, path } => {
                self.compile_access_view(base, path)?;
                self.compile_expr(value)?;
                self.emit0(OpCode::AccessSet);
            }
            _ => {
                self.compile_expr(value)?;
                self.bind_pattern(target)?;
            }
        }
        Ok(())
    }

    /// Destructure the value on top of the stack into a pattern.
    fn bind_pattern(&mut self, pattern: &Pattern) -> Result<()> {
        match pattern {
            Pattern::Ident(name) => self.store_ident(name),
            Pattern::List(items) => {
                self.emit(OpCode::ExtractList, items.len() as u32);
                // Elements are pushed in order, so the last pattern owns
                // the top of the stack.
                for item in items.iter().rev() {
                    self.bind_pattern(item)?;
                }
            }
            Pattern::Access { base, path } => {
                self.compile_access_view(base, path)?;
                self.emit0(OpCode::AccessSet);
            }
            Pattern::Constant(lit) => match lit {
                Literal::Null => self.emit(OpCode::PopAssertEqImm, Imm::Null.code()),
                Literal::Boolean(false) => self.emit(OpCode::PopAssertEqImm, Imm::False.code()),
                Literal::Boolean(true) => self.emit(OpCode::PopAssertEqImm, Imm::True.code()),
                Literal::Integer(n) => {
                    let p = self.literal_static(LiteralKey::Int(*n));
                    self.emit(OpCode::LoadPush, p.bits());
                    self.emit0(OpCode::PopAssertEq);
                }
                Literal::Str(s) => {
                    let p = self.literal_static(LiteralKey::Str(s.clone()));
                    self.emit(OpCode::LoadPush, p.bits());
                    self.emit0(OpCode::PopAssertEq);
                }
            },
        }
        Ok(())
    }

    fn compile_compound(&mut self, target: &Pattern, op: AssignOp, value: &Expr) -> Result<()> {
        match target {
            Pattern::Ident(name) => match self.resolve(name) {
                Some(Resolved::Local(off)) => self.emit(OpCode::LoadLocalPushRef, off),
                Some(Resolved::Global(p)) => self.emit(OpCode::LoadPushRef, p.bits()),
                None => {
                    return Err(Error::compile(format!(
                        "use of undeclared identifier '{}'",
                        name
                    )));
                }
            },
            Pattern::Access { base, path } => {
                self.compile_access_view(base, path)?;
                self.emit0(OpCode::AccessGetRef);
            }
            _ => {
                return Err(Error::compile(
                    "compound assignment needs a variable or subscript target",
                ));
            }
        }
        self.compile_expr(value)?;
        self.emit(OpCode::OpAssign, op.code());
        Ok(())
    }

    // ---- expressions -----------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(lit) => self.compile_literal(lit),
            Expr::Ident(name) => match self.resolve(name) {
                Some(Resolved::Local(off)) => self.emit(OpCode::LoadLocalPush, off),
                Some(Resolved::Global(p)) => self.emit(OpCode::LoadPush, p.bits()),
                None => {
                    return Err(Error::compile(format!(
                        "use of undeclared identifier '{}'",
                        name
                    )));
                }
            },
            Expr::ArgsList => {
                self.ensure_in_function("$")?;
                self.emit(OpCode::LoadLocalPush, ARGS_OFFSET);
            }
            Expr::NthArg(n) => {
                self.ensure_in_function("$n")?;
                self.emit(OpCode::GetNthArg, *n);
            }
            Expr::List(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(OpCode::ConsPush, items.len() as u32);
            }
            Expr::Object(entries) => {
                for (key, value) in entries {
                    let p = self.literal_static(LiteralKey::Str(key.clone()));
                    self.emit(OpCode::LoadPush, p.bits());
                    self.compile_expr(value)?;
                }
                self.emit(OpCode::ConsObjPush, entries.len() as u32);
            }
            Expr::Access { base, path } => {
                self.compile_access_view(base, path)?;
                self.emit0(OpCode::AccessGet);
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(OpCode::UnaryOp, op.code());
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(OpCode::BinaryOp, op.code());
            }
            Expr::Logical { op, lhs, rhs } => self.compile_logical(*op, lhs, rhs)?,
            Expr::Call { callee, args } => {
                self.emit(OpCode::PushImm, Imm::Null.code());
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(OpCode::ConsPush, args.len() as u32);
                let ret = self.new_label();
                self.emit(OpCode::Call, ret);
                self.mark(ret);
            }
            Expr::Closure { params, body } => self.compile_closure(params, body)?,
        }
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Null => self.emit(OpCode::PushImm, Imm::Null.code()),
            Literal::Boolean(false) => self.emit(OpCode::PushImm, Imm::False.code()),
            Literal::Boolean(true) => self.emit(OpCode::PushImm, Imm::True.code()),
            Literal::Integer(n) => {
                let p = self.literal_static(LiteralKey::Int(*n));
                self.emit(OpCode::LoadPush, p.bits());
            }
            Literal::Str(s) => {
                let p = self.literal_static(LiteralKey::Str(s.clone()));
                self.emit(OpCode::LoadPush, p.bits());
            }
        }
    }

    /// Short-circuit lowering; the result is always a boolean.
    fn compile_logical(&mut self, op: LogicalOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let l_short = self.new_label();
        let l_end = self.new_label();
        self.compile_expr(lhs)?;
        self.emit0(OpCode::ToBool);
        match op {
            LogicalOp::And => self.emit(OpCode::JumpZero, l_short),
            LogicalOp::Or => self.emit(OpCode::JumpNotZero, l_short),
        }
        self.compile_expr(rhs)?;
        self.emit0(OpCode::ToBool);
        self.emit(OpCode::Jump, l_end);
        self.mark(l_short);
        let imm = match op {
            LogicalOp::And => Imm::False,
            LogicalOp::Or => Imm::True,
        };
        self.emit(OpCode::PushImm, imm.code());
        self.mark(l_end);
        Ok(())
    }

    /// Emit the base and subscripts of an access chain, leaving a view on
    /// the VM's view stack and the operand stack as it was.
    fn compile_access_view(&mut self, base: &Expr, path: &[Subscript]) -> Result<()> {
        // An argument cell as base keeps its identity, so writes through
        // the view land in the caller-visible cell.
        if let Expr::NthArg(n) = base {
            self.ensure_in_function("$n")?;
            self.emit(OpCode::GetNthArgRef, *n);
        } else {
            self.compile_expr(base)?;
        }
        self.emit0(OpCode::PushAccessView);
        for subscript in path {
            match subscript {
                Subscript::Member(name) => {
                    let p = self.literal_static(LiteralKey::Str(name.clone()));
                    self.emit(OpCode::LoadPush, p.bits());
                    self.emit(OpCode::SubscriptPush, SubscriptKind::Index.code());
                }
                Subscript::Index(e) => {
                    self.compile_expr(e)?;
                    self.emit(OpCode::SubscriptPush, SubscriptKind::Index.code());
                }
                Subscript::Slice { begin, end } => {
                    match begin {
                        Some(e) => self.compile_expr(e)?,
                        None => {
                            let p = self.literal_static(LiteralKey::Int(0));
                            self.emit(OpCode::LoadPush, p.bits());
                        }
                    }
                    match end {
                        Some(e) => {
                            self.compile_expr(e)?;
                            self.emit(OpCode::SubscriptPush, SubscriptKind::ClosedSlice.code());
                        }
                        None => {
                            self.emit(OpCode::SubscriptPush, SubscriptKind::OpenSlice.code());
                        }
                    }
                }
            }
            self.emit0(OpCode::ExtendAccessView);
        }
        Ok(())
    }

    fn ensure_in_function(&self, what: &str) -> Result<()> {
        if self.scopes.is_empty() {
            return Err(Error::compile(format!("'{}' outside a function", what)));
        }
        Ok(())
    }

    /// Compile a closure body out of line and leave the closure value on
    /// the stack at the creation site.
    fn compile_closure(&mut self, params: &[String], body: &[Stmt]) -> Result<()> {
        let entry = self.new_label();
        let skip = self.new_label();
        self.emit(OpCode::Jump, skip);
        self.mark(entry);

        let enclosing: HashSet<String> = self
            .scopes
            .iter()
            .flat_map(|s| s.locals.keys().cloned())
            .collect();
        let captures = collect_captures(params, body, &|name| enclosing.contains(name));

        // Capture sources resolve in the immediate parent; analysis runs
        // on every enclosing closure, so a transitively captured name is
        // already a local (capture slot) there.
        let mut sources = Vec::with_capacity(captures.len());
        for name in &captures {
            let off = self
                .scopes
                .last()
                .and_then(|s| s.locals.get(name).copied())
                .ok_or_else(|| {
                    Error::internal(format!("capture '{}' missing from parent scope", name))
                })?;
            sources.push(off);
        }

        let mut scope = FunctionScope {
            locals: HashMap::new(),
            next_offset: FIRST_NAMED_OFFSET,
            capture_count: captures.len() as u32,
        };
        for name in &captures {
            scope.locals.insert(name.clone(), scope.next_offset);
            scope.next_offset += 1;
        }
        let mut param_offsets = Vec::with_capacity(params.len());
        for p in params {
            scope.locals.insert(p.clone(), scope.next_offset);
            param_offsets.push(scope.next_offset);
            scope.next_offset += 1;
        }
        self.scopes.push(scope);

        let prepare_index = self.text.len();
        self.emit(OpCode::PrepareFrame, 0);
        self.emit0(OpCode::ClearReg);
        for (i, off) in param_offsets.iter().enumerate() {
            self.emit(OpCode::GetNthArg, i as u32);
            self.emit(OpCode::PopSaveLocal, *off);
        }
        self.compile_stmts(body)?;
        self.emit0(OpCode::Return);

        let scope = self.scopes.pop().expect("scope pushed above");
        self.text[prepare_index].operand =
            scope.next_offset - FIRST_NAMED_OFFSET - scope.capture_count;

        self.mark(skip);
        for off in sources {
            self.emit(OpCode::LoadLocalPushRef, off);
        }
        self.emit(OpCode::ConsPush, captures.len() as u32);
        self.emit(OpCode::CreateClosure, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use yq_core::bytecode::disassemble;

    fn r#gen(source: &str) -> Memory {
        generate(&parse(source).unwrap()).unwrap()
    }

    fn listing(source: &str) -> String {
        let mem = r#gen(source);
        disassemble(&mem.text, &mem.labels)
    }

    #[test]
    fn test_arith_expression_shape() {
        let text = listing("say 1 + 2 * 3");
        assert!(text.contains("BINARY_OP *"));
        assert!(text.contains("BINARY_OP +"));
        assert!(text.contains("ACTION 0"));
        assert!(text.contains("EXIT"));
        // Multiplication happens before addition.
        assert!(text.find("BINARY_OP *").unwrap() < text.find("BINARY_OP +").unwrap());
    }

    #[test]
    fn test_top_level_assignment_declares_global() {
        let mem = r#gen("score = 10");
        assert!(mem.symbols.contains_key("score"));
        let text = disassemble(&mem.text, &mem.labels);
        assert!(text.contains("POP_SAVE S@"));
    }

    #[test]
    fn test_event_globals_are_seeded() {
        let mem = r#gen("say 1");
        for name in EVENT_GLOBALS {
            assert!(mem.symbols.contains_key(*name), "missing {}", name);
        }
    }

    #[test]
    fn test_literal_statics_are_deduplicated() {
        let mem = r#gen("say 7 + 7 + 7");
        let sevens = (0..mem.statics_len())
            .filter(|i| {
                mem.read(Pointer::static_slot(*i as u32)) == &Value::Integer(7)
            })
            .count();
        assert_eq!(sevens, 1);
    }

    #[test]
    fn test_undeclared_identifier_is_a_compile_error() {
        let err = generate(&parse("say mystery").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn test_builtin_names_resolve_to_distinguished_closures() {
        let mem = r#gen("say length(\"abc\")");
        let p = mem.symbols["length"];
        match mem.read(p) {
            Value::Closure {
                entry: Entry::Builtin(Builtin::Length),
                ..
            } => {}
            other => panic!("expected builtin closure, got {:?}", other),
        }
    }

    #[test]
    fn test_while_lowering_uses_jump_zero() {
        let text = listing("while true { say 1 }");
        assert!(text.contains("JUMP_ZERO"));
        assert!(text.contains("JUMP L"));
    }

    #[test]
    fn test_for_lowering_brackets_iterator_ops() {
        let text = listing("for x in [1, 2] say x");
        let push = text.find("PUSH_ITERATOR").unwrap();
        let done = text.find("JUMP_IF_ITER_DONE").unwrap();
        let next = text.find("ITER_NEXT_PUSH").unwrap();
        let pop = text.find("POP_ITERATOR").unwrap();
        assert!(push < done && done < next && next < pop);
    }

    #[test]
    fn test_init_guard() {
        let text = listing("init s = 0");
        assert!(text.contains("JUMP_NOT_FIRST_RUN"));
    }

    #[test]
    fn test_func_body_is_jumped_over() {
        let mem = r#gen("func f() { return 1 }\nsay f()");
        let text = disassemble(&mem.text, &mem.labels);
        assert!(text.contains("PREPARE_FRAME"));
        assert!(text.contains("CREATE_CLOSURE"));
        assert!(text.contains("POP_RETURN"));
        // The body sits behind a jump so top-level flow skips it.
        assert!(text.find("JUMP L").unwrap() < text.find("PREPARE_FRAME").unwrap());
    }

    #[test]
    fn test_closure_capture_emits_ref_loads() {
        let source = "func make() { x = 0\n return func() { x += 1\n return x } }";
        let text = listing(source);
        assert!(text.contains("LOAD_LOCAL_PUSH_REF"));
        assert!(text.contains("CONS_PUSH 1"));
    }

    #[test]
    fn test_short_circuit_shape() {
        let text = listing("a = 1\nb = 2\nsay a && b");
        assert!(text.contains("TO_BOOL"));
        assert!(text.contains("JUMP_ZERO"));
        let text = listing("a = 1\nb = 2\nsay a || b");
        assert!(text.contains("JUMP_NOT_ZERO"));
    }

    #[test]
    fn test_list_pattern_destructure_reverses() {
        let text = listing("[a, b] = [1, 2]");
        assert!(text.contains("EXTRACT_LIST 2"));
    }

    #[test]
    fn test_constant_pattern_asserts() {
        let text = listing("[1, x] = [1, 2]");
        assert!(text.contains("POP_ASSERT_EQ"));
        let text = listing("[null, x] = [null, 2]");
        assert!(text.contains("POP_ASSERT_EQ_IMM 0"));
    }

    #[test]
    fn test_compound_assignment_through_ref() {
        let text = listing("x = 1\nx += 2");
        assert!(text.contains("LOAD_PUSH_REF"));
        assert!(text.contains("OP_ASSIGN 0"));
    }

    #[test]
    fn test_access_view_for_slice_assignment() {
        let text = listing("a = [1, 2, 3]\na[1:2] = [9, 9]");
        assert!(text.contains("PUSH_ACCESS_VIEW"));
        assert!(text.contains("SUBSCRIPT_PUSH 2"));
        assert!(text.contains("EXTEND_ACCESS_VIEW"));
        assert!(text.contains("ACCESS_SET"));
    }

    #[test]
    fn test_method_call_reads_through_view() {
        let text = listing("say \"abc\".length()");
        assert!(text.contains("ACCESS_GET"));
        assert!(text.contains("CALL L"));
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        assert!(generate(&parse("break").unwrap()).is_err());
    }

    #[test]
    fn test_break_does_not_cross_function_boundary() {
        let err = generate(&parse("while true { func f() { break } }").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn test_return_at_top_level_is_rejected() {
        assert!(generate(&parse("return 1").unwrap()).is_err());
    }

    #[test]
    fn test_all_labels_are_patched() {
        let mem = r#gen("func f(a) { if a > 0 { return a } else { return 0 - a } }\nsay f(0 - 4)");
        assert!(mem.labels.iter().all(|&i| i != UNPATCHED));
    }
}
