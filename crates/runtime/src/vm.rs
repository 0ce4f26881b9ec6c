//! The stack virtual machine.
//!
//! One flat dispatch loop over the bytecode vector. Jumps resolve
//! through the label table; every jump, call, and frame preparation is
//! an interrupt checkpoint, which is how the host's deadline reaches a
//! running program. The collector runs at jump checkpoints only, and
//! never while a host builtin frame is active, so builtins may hold raw
//! pointers across their own reentrant calls.
//!
//! Besides the operand stack (which lives in [`Memory`]), the VM owns
//! the iterator stack, the access-view stack, and the one-slot return
//! register. All of them are GC roots.

use crate::access::{self, AccessView};
use crate::builtins;
use crate::context::Effects;
use crate::iter::{IterPhase, IterState};
use crate::ops;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};
use yq_core::bytecode::{ActionKind, AssignOp, BinaryOp, Imm, OpCode, SubscriptKind, UnaryOp};
use yq_core::error::{Error, Result};
use yq_core::gc::ExternalRoots;
use yq_core::memory::Memory;
use yq_core::pointer::Pointer;
use yq_core::value::{Collection, Entry, Ref, Value, ValueKind};

/// Sentinel return label for frames pushed by host code; `POP_RETURN`
/// hands control back to the Rust caller instead of jumping.
const HOST_RETURN: usize = usize::MAX;

/// Heap size that arms the first collection.
const GC_INITIAL_THRESHOLD: usize = 4096;

enum Flow {
    Continue,
    Exit,
    HostReturn,
}

pub struct Vm {
    pub memory: Memory,
    pc: usize,
    iters: Vec<IterState>,
    views: Vec<AccessView>,
    register: Option<Pointer>,
    /// Iterator/view stack depths at each live code frame's entry;
    /// returning truncates to them, so a `return` inside `for` cannot
    /// leak loop state into the caller.
    frame_marks: Vec<(usize, usize)>,
    interrupt: Arc<AtomicBool>,
    gc_threshold: usize,
    /// Non-zero while a builtin frame is live; collection is deferred.
    host_depth: u32,
    regexes: HashMap<(String, String), regex::Regex>,
}

impl Vm {
    pub fn new(memory: Memory) -> Self {
        Vm {
            memory,
            pc: 0,
            iters: Vec::new(),
            views: Vec::new(),
            register: None,
            frame_marks: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            gc_threshold: GC_INITIAL_THRESHOLD,
            host_depth: 0,
            regexes: HashMap::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Take the memory back, e.g. to serialize it after a run.
    pub fn into_memory(self) -> Memory {
        self.memory
    }

    /// Execute from the top of the program until `EXIT`.
    pub fn run(&mut self, ctx: &mut dyn Effects) -> Result<()> {
        self.pc = 0;
        debug!(instructions = self.memory.text.len(), "program start");
        loop {
            match self.step(ctx)? {
                Flow::Continue => {}
                Flow::Exit => {
                    debug!("program end");
                    return Ok(());
                }
                Flow::HostReturn => {
                    return Err(Error::internal("stray host-return outside a call"));
                }
            }
        }
    }

    /// Invoke a callable value with already-evaluated arguments. Used by
    /// builtins (map, filter, reduce, sorted) to run user closures.
    pub fn call_value(
        &mut self,
        ctx: &mut dyn Effects,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value> {
        match callee {
            Value::Closure {
                entry: Entry::Code(label),
                captures,
            } => {
                let saved_pc = self.pc;
                let caller = self.memory.allocate(Value::Null);
                let args_cell = self.alloc_args(args);
                let captures_cell = self.memory.allocate(Value::Reference(captures.clone()));
                self.memory
                    .push_frame(HOST_RETURN, caller, args_cell, captures_cell);
                self.frame_marks.push((self.iters.len(), self.views.len()));
                self.pc = self.label_target(*label)?;
                loop {
                    match self.step(ctx)? {
                        Flow::Continue => {}
                        Flow::HostReturn => break,
                        Flow::Exit => {
                            return Err(Error::internal("program exited inside a call"));
                        }
                    }
                }
                let rv = self.memory.pop()?;
                self.pc = saved_pc;
                Ok(self.memory.read(rv).clone())
            }
            Value::Closure {
                entry: Entry::Builtin(b),
                ..
            } => {
                let caller = self.memory.allocate(Value::Null);
                self.invoke_builtin_with_frame(ctx, *b, caller, args)
            }
            Value::BoundMethod { method, receiver } => {
                self.invoke_builtin_with_frame(ctx, *method, *receiver, args)
            }
            other => Err(Error::type_mismatch(
                &[ValueKind::Closure],
                self.memory.kind_of(other),
            )),
        }
    }

    fn alloc_args(&mut self, args: Vec<Value>) -> Pointer {
        let cells: Vec<Pointer> = args.into_iter().map(|v| self.memory.allocate(v)).collect();
        let id = self.memory.put_collection(Collection::List(cells));
        self.memory.allocate(Value::Reference(Ref::Bound(id)))
    }

    fn invoke_builtin_with_frame(
        &mut self,
        ctx: &mut dyn Effects,
        b: yq_core::builtin::Builtin,
        caller: Pointer,
        args: Vec<Value>,
    ) -> Result<Value> {
        let args_cell = self.alloc_args(args);
        let captures_cell = self.memory.allocate(Value::Null);
        self.memory
            .push_frame(HOST_RETURN, caller, args_cell, captures_cell);
        let result = self.run_builtin(ctx, b);
        self.memory.pop_frame()?;
        result
    }

    fn run_builtin(
        &mut self,
        ctx: &mut dyn Effects,
        b: yq_core::builtin::Builtin,
    ) -> Result<Value> {
        self.host_depth += 1;
        let result = builtins::invoke(self, b, ctx);
        self.host_depth -= 1;
        result
    }

    /// The receiver (frame caller slot, when not null) and the argument
    /// cells of the current builtin frame.
    pub(crate) fn builtin_frame(&self) -> Result<(Option<Pointer>, Vec<Pointer>)> {
        let caller = self.memory.local(0)?;
        let receiver = match self.memory.read(caller) {
            Value::Null => None,
            _ => Some(caller),
        };
        let args_cell = self.memory.local(1)?;
        let args = match self.memory.read(args_cell) {
            Value::Reference(r) => match self.memory.resolve_ref(r) {
                Collection::List(items) => items.clone(),
                _ => return Err(Error::internal("argument list is not a list")),
            },
            _ => return Err(Error::internal("argument list is not a list")),
        };
        Ok((receiver, args))
    }

    /// Compile (and cache) a regex value.
    pub(crate) fn compiled_regex(&mut self, pattern: &str, flags: &str) -> Result<regex::Regex> {
        let key = (pattern.to_string(), flags.to_string());
        if let Some(re) = self.regexes.get(&key) {
            return Ok(re.clone());
        }
        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                other => {
                    return Err(Error::builtin(format!("unknown regex flag '{}'", other)));
                }
            };
        }
        let re = builder
            .build()
            .map_err(|e| Error::builtin(format!("invalid regex: {}", e)))?;
        self.regexes.insert(key, re.clone());
        Ok(re)
    }

    // ---- checkpoints -----------------------------------------------------

    fn checkpoint(&mut self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }
        self.maybe_gc();
        Ok(())
    }

    fn maybe_gc(&mut self) {
        if self.host_depth > 0 || self.memory.heap_len() <= self.gc_threshold {
            return;
        }
        let mut roots = ExternalRoots::default();
        for it in &mut self.iters {
            if let Some(id) = it.collection_id_mut() {
                roots.collections.push(id);
            }
        }
        for view in &mut self.views {
            roots.pointers.push(&mut view.base);
        }
        if let Some(reg) = &mut self.register {
            roots.pointers.push(reg);
        }
        let stats = self.memory.collect_garbage(roots);
        self.gc_threshold = (stats.live_cells * 2).max(GC_INITIAL_THRESHOLD);
        trace!(
            live = stats.live_cells,
            freed = stats.freed_cells,
            "collected garbage"
        );
    }

    // ---- dispatch --------------------------------------------------------

    fn step(&mut self, ctx: &mut dyn Effects) -> Result<Flow> {
        let Some(bc) = self.memory.text.get(self.pc).copied() else {
            return Ok(Flow::Exit);
        };
        let mut next_pc = self.pc + 1;
        match bc.op {
            OpCode::LoadLocalPush => {
                let p = self.memory.local(bc.operand as usize)?;
                let q = self.memory.copy(p);
                self.memory.push(q);
            }
            OpCode::LoadLocalPushRef => {
                let p = self.memory.local(bc.operand as usize)?;
                self.memory.push(p);
            }
            OpCode::LoadPush => {
                let q = self.memory.copy(Pointer::from_bits(bc.operand));
                self.memory.push(q);
            }
            OpCode::LoadPushRef => {
                self.memory.push(Pointer::from_bits(bc.operand));
            }
            OpCode::PopSaveLocal => {
                let p = self.memory.pop()?;
                let target = self.memory.local(bc.operand as usize)?;
                let v = self.memory.read(p).clone();
                self.memory.write(target, v);
            }
            OpCode::PopSave => {
                let p = self.memory.pop()?;
                let v = self.memory.read(p).clone();
                self.memory.write(Pointer::from_bits(bc.operand), v);
            }
            OpCode::PopAssertEq => {
                let expected = self.memory.pop()?;
                let actual = self.memory.pop()?;
                let expected = self.memory.read(expected).clone();
                let actual = self.memory.read(actual).clone();
                if !self.memory.values_equal(&expected, &actual) {
                    return Err(Error::PatternMismatch);
                }
            }
            OpCode::ConsPush => {
                let n = bc.operand as usize;
                let mut cells = Vec::with_capacity(n);
                for _ in 0..n {
                    cells.push(self.memory.pop()?);
                }
                cells.reverse();
                let id = self.memory.put_collection(Collection::List(cells));
                let cell = self.memory.allocate(Value::Reference(Ref::Bound(id)));
                self.memory.push(cell);
            }
            OpCode::ExtractList => {
                let n = bc.operand as usize;
                let p = self.memory.pop()?;
                let slots = match self.memory.read(p) {
                    Value::Reference(r) => match self.memory.resolve_ref(r) {
                        Collection::List(items) => items.clone(),
                        other => {
                            return Err(Error::type_mismatch(&[ValueKind::List], match other {
                                Collection::String(_) => ValueKind::String,
                                Collection::Object(_) => ValueKind::Object,
                                Collection::List(_) => ValueKind::List,
                            }));
                        }
                    },
                    other => {
                        let kind = self.memory.kind_of(other);
                        return Err(Error::type_mismatch(&[ValueKind::List], kind));
                    }
                };
                for i in 0..n {
                    let cell = match slots.get(i) {
                        Some(slot) => self.memory.copy(*slot),
                        None => self.memory.allocate(Value::Null),
                    };
                    self.memory.push(cell);
                }
            }
            OpCode::SubscriptPush => {
                let kind = SubscriptKind::from_code(bc.operand)
                    .ok_or_else(|| Error::internal("bad subscript kind"))?;
                let subscript = self.build_subscript(kind)?;
                let cell = self.memory.allocate(subscript);
                self.memory.push(cell);
            }
            OpCode::ConsObjPush => {
                let n = bc.operand as usize;
                let mut pairs = Vec::with_capacity(n);
                for _ in 0..n {
                    let value = self.memory.pop()?;
                    let key = self.memory.pop()?;
                    pairs.push((key, value));
                }
                pairs.reverse();
                let mut map = std::collections::BTreeMap::new();
                for (key_p, value_p) in pairs {
                    let key = self
                        .memory
                        .read_string(self.memory.read(key_p))
                        .ok_or_else(|| {
                            Error::type_mismatch(
                                &[ValueKind::String],
                                self.memory.kind_of(self.memory.read(key_p)),
                            )
                        })?
                        .to_string();
                    map.insert(key, value_p);
                }
                let id = self.memory.put_collection(Collection::Object(map));
                let cell = self.memory.allocate(Value::Reference(Ref::Bound(id)));
                self.memory.push(cell);
            }
            OpCode::PushImm => {
                let v = imm_value(bc.operand)?;
                let cell = self.memory.allocate(v);
                self.memory.push(cell);
            }
            OpCode::PopAssertEqImm => {
                let p = self.memory.pop()?;
                let actual = self.memory.read(p).clone();
                let expected = imm_value(bc.operand)?;
                if !self.memory.values_equal(&expected, &actual) {
                    return Err(Error::PatternMismatch);
                }
            }
            OpCode::Action => {
                let kind = ActionKind::from_code(bc.operand)
                    .ok_or_else(|| Error::internal("bad action code"))?;
                self.perform_action(kind, ctx)?;
            }
            OpCode::Jump => {
                self.checkpoint()?;
                next_pc = self.label_target(bc.operand)?;
            }
            OpCode::JumpZero => {
                self.checkpoint()?;
                let p = self.memory.pop()?;
                if !self.memory.truthy(self.memory.read(p)) {
                    next_pc = self.label_target(bc.operand)?;
                }
            }
            OpCode::JumpNotZero => {
                self.checkpoint()?;
                let p = self.memory.pop()?;
                if self.memory.truthy(self.memory.read(p)) {
                    next_pc = self.label_target(bc.operand)?;
                }
            }
            OpCode::JumpIfIterDone => {
                self.checkpoint()?;
                let done = {
                    let it = self
                        .iters
                        .last()
                        .ok_or_else(|| Error::internal("iterator stack underflow"))?;
                    it.phase == IterPhase::Done || it.is_done(&self.memory)
                };
                if done {
                    if let Some(it) = self.iters.last_mut() {
                        it.phase = IterPhase::Done;
                    }
                    next_pc = self.label_target(bc.operand)?;
                }
            }
            OpCode::JumpNotFirstRun => {
                if !ctx.first_run() {
                    next_pc = self.label_target(bc.operand)?;
                }
            }
            OpCode::CreateClosure => {
                let p = self.memory.pop()?;
                let captures = match self.memory.read(p) {
                    Value::Reference(r) => r.clone(),
                    other => {
                        return Err(Error::internal(format!(
                            "closure captures are not a list: {:?}",
                            other
                        )));
                    }
                };
                let cell = self.memory.allocate(Value::Closure {
                    captures,
                    entry: Entry::Code(bc.operand),
                });
                self.memory.push(cell);
            }
            OpCode::PrepareFrame => {
                self.checkpoint()?;
                let captures_cell = self.memory.pop()?;
                let capture_slots = match self.memory.read(captures_cell) {
                    Value::Reference(r) => match self.memory.resolve_ref(r) {
                        Collection::List(items) => items.clone(),
                        _ => return Err(Error::internal("captures are not a list")),
                    },
                    Value::Null => Vec::new(),
                    _ => return Err(Error::internal("captures are not a list")),
                };
                // Captured cells are shared with the enclosing
                // activation; locals get fresh null cells.
                for slot in capture_slots {
                    self.memory.push(slot);
                }
                for _ in 0..bc.operand {
                    let cell = self.memory.allocate(Value::Null);
                    self.memory.push(cell);
                }
            }
            OpCode::GetNthArg => {
                let cell = match self.arg_slot(bc.operand as usize)? {
                    Some(slot) => self.memory.copy(slot),
                    None => self.memory.allocate(Value::Null),
                };
                self.memory.push(cell);
            }
            OpCode::GetNthArgRef => {
                let slot = self.arg_slot(bc.operand as usize)?.ok_or_else(|| {
                    Error::builtin(format!("missing argument {}", bc.operand))
                })?;
                self.memory.push(slot);
            }
            OpCode::PopReturn => {
                let rv = self.memory.pop()?;
                let ret = self.memory.pop_frame()?;
                self.memory.push(rv);
                self.register = None;
                self.unwind_frame_marks();
                if ret == HOST_RETURN {
                    return Ok(Flow::HostReturn);
                }
                next_pc = self.label_target(ret as u32)?;
            }
            OpCode::Call => {
                self.checkpoint()?;
                let args = self.memory.pop()?;
                let callee = self.memory.pop()?;
                let caller = self.memory.pop()?;
                let callee_value = self.memory.read(callee).clone();
                match callee_value {
                    Value::Closure {
                        entry: Entry::Code(label),
                        captures,
                    } => {
                        let captures_cell = self.memory.allocate(Value::Reference(captures));
                        self.memory.push_frame(
                            bc.operand as usize,
                            caller,
                            args,
                            captures_cell,
                        );
                        self.frame_marks.push((self.iters.len(), self.views.len()));
                        next_pc = self.label_target(label)?;
                    }
                    Value::Closure {
                        entry: Entry::Builtin(b),
                        ..
                    } => {
                        let captures_cell = self.memory.allocate(Value::Null);
                        self.memory
                            .push_frame(bc.operand as usize, caller, args, captures_cell);
                        let result = self.run_builtin(ctx, b);
                        let ret = self.memory.pop_frame()?;
                        let cell = self.memory.allocate(result?);
                        self.memory.push(cell);
                        next_pc = self.label_target(ret as u32)?;
                    }
                    Value::BoundMethod { method, receiver } => {
                        let captures_cell = self.memory.allocate(Value::Null);
                        self.memory
                            .push_frame(bc.operand as usize, receiver, args, captures_cell);
                        let result = self.run_builtin(ctx, method);
                        let ret = self.memory.pop_frame()?;
                        let cell = self.memory.allocate(result?);
                        self.memory.push(cell);
                        next_pc = self.label_target(ret as u32)?;
                    }
                    other => {
                        return Err(Error::type_mismatch(
                            &[ValueKind::Closure],
                            self.memory.kind_of(&other),
                        ));
                    }
                }
            }
            OpCode::Return => {
                let rv = match self.register.take() {
                    Some(p) => p,
                    None => self.memory.allocate(Value::Null),
                };
                let ret = self.memory.pop_frame()?;
                self.memory.push(rv);
                self.unwind_frame_marks();
                if ret == HOST_RETURN {
                    return Ok(Flow::HostReturn);
                }
                next_pc = self.label_target(ret as u32)?;
            }
            OpCode::Nop => {}
            OpCode::Pop => {
                self.memory.pop()?;
            }
            OpCode::PopSaveToReg => {
                self.register = Some(self.memory.pop()?);
            }
            OpCode::ClearReg => {
                self.register = None;
            }
            OpCode::PushIterator => {
                let p = self.memory.pop()?;
                let v = self.memory.read(p).clone();
                let it = IterState::from_value(&self.memory, &v)?;
                self.iters.push(it);
            }
            OpCode::PopIterator => {
                self.iters
                    .pop()
                    .ok_or_else(|| Error::internal("iterator stack underflow"))?;
            }
            OpCode::IterNextPush => {
                let mut it = self
                    .iters
                    .pop()
                    .ok_or_else(|| Error::internal("iterator stack underflow"))?;
                let v = it.next(&mut self.memory)?;
                self.iters.push(it);
                let cell = self.memory.allocate(v);
                self.memory.push(cell);
            }
            OpCode::PushAccessView => {
                let base = self.memory.pop()?;
                self.views.push(AccessView {
                    base,
                    path: Vec::new(),
                });
            }
            OpCode::ExtendAccessView => {
                let p = self.memory.pop()?;
                let subscript = self.memory.read(p).clone();
                let view = self
                    .views
                    .last_mut()
                    .ok_or_else(|| Error::internal("access view stack underflow"))?;
                view.path.push(subscript);
            }
            OpCode::AccessGet => {
                let view = self
                    .views
                    .pop()
                    .ok_or_else(|| Error::internal("access view stack underflow"))?;
                let v = access::get(&mut self.memory, &view)?;
                let cell = self.memory.allocate(v);
                self.memory.push(cell);
            }
            OpCode::AccessGetRef => {
                let view = self
                    .views
                    .pop()
                    .ok_or_else(|| Error::internal("access view stack underflow"))?;
                let slot = access::get_ref(&mut self.memory, &view)?;
                self.memory.push(slot);
            }
            OpCode::AccessSet => {
                let rhs = self.memory.pop()?;
                let view = self
                    .views
                    .pop()
                    .ok_or_else(|| Error::internal("access view stack underflow"))?;
                let rhs = self.memory.read(rhs).clone();
                access::set(&mut self.memory, &view, rhs)?;
            }
            OpCode::BinaryOp => {
                let op = BinaryOp::from_code(bc.operand)
                    .ok_or_else(|| Error::internal("bad binary op"))?;
                let rhs = self.memory.pop()?;
                let lhs = self.memory.pop()?;
                let lhs = self.memory.read(lhs).clone();
                let rhs = self.memory.read(rhs).clone();
                let v = ops::binary(&mut self.memory, op, &lhs, &rhs)?;
                let cell = self.memory.allocate(v);
                self.memory.push(cell);
            }
            OpCode::UnaryOp => {
                let op = UnaryOp::from_code(bc.operand)
                    .ok_or_else(|| Error::internal("bad unary op"))?;
                let p = self.memory.pop()?;
                let v = self.memory.read(p).clone();
                let v = ops::unary(&self.memory, op, &v)?;
                let cell = self.memory.allocate(v);
                self.memory.push(cell);
            }
            OpCode::ToBool => {
                let p = self.memory.pop()?;
                let b = self.memory.truthy(self.memory.read(p));
                let cell = self.memory.allocate(Value::Boolean(b));
                self.memory.push(cell);
            }
            OpCode::OpAssign => {
                let op = AssignOp::from_code(bc.operand)
                    .ok_or_else(|| Error::internal("bad assign op"))?;
                let rhs = self.memory.pop()?;
                let target = self.memory.pop()?;
                let rhs = self.memory.read(rhs).clone();
                ops::op_assign(&mut self.memory, op, target, &rhs)?;
            }
            OpCode::Exit => return Ok(Flow::Exit),
        }
        self.pc = next_pc;
        Ok(Flow::Continue)
    }

    /// Drop iterator and view state the returning frame left behind.
    fn unwind_frame_marks(&mut self) {
        if let Some((iters, views)) = self.frame_marks.pop() {
            self.iters.truncate(iters);
            self.views.truncate(views);
        }
    }

    fn label_target(&self, label: u32) -> Result<usize> {
        self.memory
            .labels
            .get(label as usize)
            .copied()
            .ok_or_else(|| Error::internal(format!("unknown label L{}", label)))
    }

    fn arg_slot(&self, n: usize) -> Result<Option<Pointer>> {
        let args_cell = self.memory.local(1)?;
        match self.memory.read(args_cell) {
            Value::Reference(r) => match self.memory.resolve_ref(r) {
                Collection::List(items) => Ok(items.get(n).copied()),
                _ => Err(Error::internal("argument list is not a list")),
            },
            _ => Err(Error::internal("argument list is not a list")),
        }
    }

    fn build_subscript(&mut self, kind: SubscriptKind) -> Result<Value> {
        match kind {
            SubscriptKind::Index => {
                let p = self.memory.pop()?;
                let v = self.memory.read(p);
                if let Some(begin) = v.as_integer() {
                    Ok(Value::IntSubscript {
                        begin,
                        end: None,
                        extended: false,
                    })
                } else if let Some(key) = self.memory.read_string(v) {
                    Ok(Value::KeySubscript(key.to_string()))
                } else {
                    Err(Error::type_mismatch(
                        &[ValueKind::Integer, ValueKind::String],
                        self.memory.kind_of(v),
                    ))
                }
            }
            SubscriptKind::OpenSlice => {
                let p = self.memory.pop()?;
                let begin = self.expect_index(p)?;
                Ok(Value::IntSubscript {
                    begin,
                    end: None,
                    extended: true,
                })
            }
            SubscriptKind::ClosedSlice => {
                let end_p = self.memory.pop()?;
                let begin_p = self.memory.pop()?;
                let end = self.expect_index(end_p)?;
                let begin = self.expect_index(begin_p)?;
                Ok(Value::IntSubscript {
                    begin,
                    end: Some(end),
                    extended: true,
                })
            }
        }
    }

    fn expect_index(&self, p: Pointer) -> Result<i64> {
        let v = self.memory.read(p);
        v.as_integer().ok_or_else(|| {
            Error::type_mismatch(&[ValueKind::Integer], self.memory.kind_of(v))
        })
    }

    fn perform_action(&mut self, kind: ActionKind, ctx: &mut dyn Effects) -> Result<()> {
        let p = self.memory.pop()?;
        let v = self.memory.read(p).clone();
        match kind {
            ActionKind::Say => {
                let text = self.memory.display_value(&v);
                ctx.say(text);
            }
            ActionKind::Nudge => match v.as_integer() {
                Some(user) => ctx.nudge(user),
                None => {
                    return Err(Error::type_mismatch(
                        &[ValueKind::Integer],
                        self.memory.kind_of(&v),
                    ));
                }
            },
            ActionKind::PicSave | ActionKind::PicSend => {
                let Some(pic) = self.memory.read_string(&v) else {
                    return Err(Error::type_mismatch(
                        &[ValueKind::String],
                        self.memory.kind_of(&v),
                    ));
                };
                if kind == ActionKind::PicSave {
                    ctx.picsave(pic.to_string());
                } else {
                    ctx.picsend(pic.to_string());
                }
            }
        }
        Ok(())
    }
}

fn imm_value(code: u32) -> Result<Value> {
    match Imm::from_code(code) {
        Some(Imm::Null) => Ok(Value::Null),
        Some(Imm::False) => Ok(Value::Boolean(false)),
        Some(Imm::True) => Ok(Value::Boolean(true)),
        None => Err(Error::internal("bad immediate code")),
    }
}
