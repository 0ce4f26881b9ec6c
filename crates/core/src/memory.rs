//! Program memory: heap, static area, collection pool, and the call stack.
//!
//! The operand stack and call frames share one vector of slots. A frame is
//! laid out `[lastBp, retLabel, caller, args, captures...]` from its base
//! pointer; everything above the last frame's locals is operand scratch.
//! Operand entries are always heap pointers; immediates are materialized
//! by allocating a fresh cell.

use crate::bytecode::ByteCode;
use crate::error::{Error, Result};
use crate::pointer::{CollectionId, Pointer, Region};
use crate::value::{Collection, NumericPair, Ref, Value, ValueKind, numeric_pair};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One slot of the unified call/operand stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    /// A heap (or, transiently, static) pointer.
    Ptr(Pointer),
    /// Frame bookkeeping: a saved base pointer or a return label.
    Raw(usize),
}

/// Frame header width: saved bp and return label.
const FRAME_HEADER: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Memory {
    /// Program text. Jump operands index [`Memory::labels`].
    pub text: Vec<ByteCode>,
    /// Label table: label id to instruction index.
    pub labels: Vec<usize>,
    /// Symbol table: global name to static pointer.
    pub symbols: HashMap<String, Pointer>,
    pub(crate) statics: Vec<Value>,
    pub(crate) heap: Vec<Value>,
    pub(crate) pool: Vec<Collection>,
    pub(crate) stack: Vec<Slot>,
    pub(crate) bp: usize,
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    pub fn from_parts(
        text: Vec<ByteCode>,
        labels: Vec<usize>,
        statics: Vec<Value>,
        symbols: HashMap<String, Pointer>,
    ) -> Self {
        Memory {
            text,
            labels,
            symbols,
            statics,
            ..Memory::default()
        }
    }

    // ---- cells ----------------------------------------------------------

    /// Allocate a fresh heap cell holding `v`.
    pub fn allocate(&mut self, v: Value) -> Pointer {
        let offset = self.heap.len() as u32;
        self.heap.push(v);
        Pointer::heap(offset)
    }

    pub fn read(&self, p: Pointer) -> &Value {
        match p.region() {
            Region::Heap => &self.heap[p.offset()],
            Region::Static => &self.statics[p.offset()],
        }
    }

    pub fn write(&mut self, p: Pointer, v: Value) {
        match p.region() {
            Region::Heap => self.heap[p.offset()] = v,
            Region::Static => self.statics[p.offset()] = v,
        }
    }

    /// Allocate a fresh cell carrying a copy of the value at `p`.
    ///
    /// Copying is where pending references solidify: a literal collection
    /// baked into the static pool becomes a fresh pool entry, so constants
    /// stay pristine no matter what execution does to the copy.
    pub fn copy(&mut self, p: Pointer) -> Pointer {
        let v = self.read(p).clone();
        let v = self.solidified(v);
        self.allocate(v)
    }

    /// Bind a pending reference into the pool; other values pass through.
    pub fn solidified(&mut self, v: Value) -> Value {
        match v {
            Value::Reference(Ref::Pending(c)) => {
                let id = self.put_collection(*c);
                Value::Reference(Ref::Bound(id))
            }
            other => other,
        }
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    // ---- collections ----------------------------------------------------

    pub fn put_collection(&mut self, c: Collection) -> CollectionId {
        let id = CollectionId(self.pool.len() as u32);
        self.pool.push(c);
        id
    }

    pub fn collection(&self, id: CollectionId) -> &Collection {
        &self.pool[id.index()]
    }

    pub fn collection_mut(&mut self, id: CollectionId) -> &mut Collection {
        &mut self.pool[id.index()]
    }

    pub fn resolve_ref<'a>(&'a self, r: &'a Ref) -> &'a Collection {
        match r {
            Ref::Pending(c) => c,
            Ref::Bound(id) => self.collection(*id),
        }
    }

    /// A bound string reference.
    pub fn alloc_string(&mut self, text: impl Into<String>) -> Value {
        let id = self.put_collection(Collection::String(text.into()));
        Value::Reference(Ref::Bound(id))
    }

    /// A bound list reference; each value gets its own fresh cell.
    pub fn alloc_list(&mut self, values: Vec<Value>) -> Value {
        let slots = values.into_iter().map(|v| self.allocate(v)).collect();
        let id = self.put_collection(Collection::List(slots));
        Value::Reference(Ref::Bound(id))
    }

    /// The text of a string reference, if the value is one.
    pub fn read_string<'a>(&'a self, v: &'a Value) -> Option<&'a str> {
        match v {
            Value::Reference(r) => match self.resolve_ref(r) {
                Collection::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    // ---- operand stack and frames ---------------------------------------

    pub fn push(&mut self, p: Pointer) {
        self.stack.push(Slot::Ptr(p));
    }

    pub fn pop(&mut self) -> Result<Pointer> {
        match self.stack.pop() {
            Some(Slot::Ptr(p)) => Ok(p),
            Some(Slot::Raw(_)) => Err(Error::internal("popped into a frame header")),
            None => Err(Error::internal("operand stack underflow")),
        }
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn push_frame(
        &mut self,
        return_label: usize,
        caller: Pointer,
        args: Pointer,
        captures: Pointer,
    ) {
        let old_bp = self.bp;
        self.bp = self.stack.len();
        self.stack.push(Slot::Raw(old_bp));
        self.stack.push(Slot::Raw(return_label));
        self.stack.push(Slot::Ptr(caller));
        self.stack.push(Slot::Ptr(args));
        self.stack.push(Slot::Ptr(captures));
    }

    /// Drop the current frame and everything above it; restores the
    /// caller's base pointer and hands back the return label.
    pub fn pop_frame(&mut self) -> Result<usize> {
        if self.stack.len() < self.bp + FRAME_HEADER {
            return Err(Error::internal("no frame to pop"));
        }
        let last_bp = match self.stack[self.bp] {
            Slot::Raw(n) => n,
            Slot::Ptr(_) => return Err(Error::internal("corrupt frame base")),
        };
        let return_label = match self.stack[self.bp + 1] {
            Slot::Raw(n) => n,
            Slot::Ptr(_) => return Err(Error::internal("corrupt return label")),
        };
        self.stack.truncate(self.bp);
        self.bp = last_bp;
        Ok(return_label)
    }

    /// The cell pointer of a frame local. Offset 0 is the caller, 1 the
    /// argument list; captures and declared locals follow.
    pub fn local(&self, offset: usize) -> Result<Pointer> {
        match self.stack.get(self.bp + FRAME_HEADER + offset) {
            Some(Slot::Ptr(p)) => Ok(*p),
            _ => Err(Error::internal(format!("bad local offset {}", offset))),
        }
    }

    // ---- globals ---------------------------------------------------------

    pub fn statics_len(&self) -> usize {
        self.statics.len()
    }

    pub fn push_static(&mut self, v: Value) -> Pointer {
        let p = Pointer::static_slot(self.statics.len() as u32);
        self.statics.push(v);
        p
    }

    /// Overwrite a named global. Returns false when the name is unknown.
    pub fn set_global(&mut self, name: &str, v: Value) -> bool {
        match self.symbols.get(name).copied() {
            Some(p) => {
                let v = self.solidified(v);
                self.write(p, v);
                true
            }
            None => false,
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.symbols.get(name).map(|p| self.read(*p))
    }

    // ---- value queries ---------------------------------------------------

    pub fn kind_of(&self, v: &Value) -> ValueKind {
        match v {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Reference(r) => match self.resolve_ref(r) {
                Collection::String(_) => ValueKind::String,
                Collection::List(_) => ValueKind::List,
                Collection::Object(_) => ValueKind::Object,
            },
            Value::Closure { .. } => ValueKind::Closure,
            Value::BoundMethod { .. } => ValueKind::Method,
            Value::Regex { .. } => ValueKind::Regex,
            Value::IntSubscript { .. } | Value::KeySubscript(_) => ValueKind::Subscript,
            Value::Range { .. } | Value::CharRange { .. } => ValueKind::Range,
        }
    }

    pub fn truthy(&self, v: &Value) -> bool {
        match v {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Reference(r) => !self.resolve_ref(r).is_empty(),
            _ => true,
        }
    }

    /// Structural equality with arithmetic coercion. Defined universally;
    /// behaviour on cyclic structures is unspecified.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        if let Some(pair) = numeric_pair(a, b) {
            return match pair {
                NumericPair::Integers(x, y) => x == y,
                NumericPair::Floats(x, y) => x == y,
            };
        }
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Reference(ra), Value::Reference(rb)) => {
                if let (Ref::Bound(ia), Ref::Bound(ib)) = (ra, rb)
                    && ia == ib
                {
                    return true;
                }
                self.collections_equal(self.resolve_ref(ra), self.resolve_ref(rb))
            }
            (
                Value::Closure {
                    captures: ca,
                    entry: ea,
                },
                Value::Closure {
                    captures: cb,
                    entry: eb,
                },
            ) => ea == eb && ca == cb,
            (
                Value::BoundMethod {
                    method: ma,
                    receiver: pa,
                },
                Value::BoundMethod {
                    method: mb,
                    receiver: pb,
                },
            ) => ma == mb && self.values_equal(self.read(*pa), self.read(*pb)),
            (
                Value::Regex {
                    pattern: pa,
                    flags: fa,
                },
                Value::Regex {
                    pattern: pb,
                    flags: fb,
                },
            ) => pa == pb && fa == fb,
            (
                Value::Range {
                    begin: ba,
                    end: ea,
                    inclusive: ia,
                },
                Value::Range {
                    begin: bb,
                    end: eb,
                    inclusive: ib,
                },
            ) => ba == bb && ea == eb && ia == ib,
            (
                Value::CharRange {
                    begin: ba,
                    end: ea,
                    inclusive: ia,
                },
                Value::CharRange {
                    begin: bb,
                    end: eb,
                    inclusive: ib,
                },
            ) => ba == bb && ea == eb && ia == ib,
            (Value::KeySubscript(ka), Value::KeySubscript(kb)) => ka == kb,
            (
                Value::IntSubscript {
                    begin: ba,
                    end: ea,
                    extended: xa,
                },
                Value::IntSubscript {
                    begin: bb,
                    end: eb,
                    extended: xb,
                },
            ) => ba == bb && ea == eb && xa == xb,
            _ => false,
        }
    }

    fn collections_equal(&self, a: &Collection, b: &Collection) -> bool {
        match (a, b) {
            (Collection::String(sa), Collection::String(sb)) => sa == sb,
            (Collection::List(la), Collection::List(lb)) => {
                la.len() == lb.len()
                    && la
                        .iter()
                        .zip(lb)
                        .all(|(pa, pb)| self.values_equal(self.read(*pa), self.read(*pb)))
            }
            (Collection::Object(ma), Collection::Object(mb)) => {
                ma.len() == mb.len()
                    && ma.iter().zip(mb).all(|((ka, pa), (kb, pb))| {
                        ka == kb && self.values_equal(self.read(*pa), self.read(*pb))
                    })
            }
            _ => false,
        }
    }

    /// Ordering for `<`-family operators and sorting: arithmetic against
    /// arithmetic, string against string.
    pub fn compare(&self, a: &Value, b: &Value) -> Result<Ordering> {
        if let Some(pair) = numeric_pair(a, b) {
            return Ok(match pair {
                NumericPair::Integers(x, y) => x.cmp(&y),
                NumericPair::Floats(x, y) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            });
        }
        if let (Some(sa), Some(sb)) = (self.read_string(a), self.read_string(b)) {
            return Ok(sa.cmp(sb));
        }
        Err(Error::type_mismatch(
            &[ValueKind::Integer, ValueKind::Float, ValueKind::String],
            self.kind_of(b),
        ))
    }

    /// Membership: substring, list element, object key, or range member.
    pub fn contains(&self, container: &Value, item: &Value) -> Result<bool> {
        match container {
            Value::Reference(r) => match self.resolve_ref(r) {
                Collection::String(s) => match self.read_string(item) {
                    Some(needle) => Ok(s.contains(needle)),
                    None => Err(Error::type_mismatch(
                        &[ValueKind::String],
                        self.kind_of(item),
                    )),
                },
                Collection::List(items) => Ok(items
                    .iter()
                    .any(|p| self.values_equal(self.read(*p), item))),
                Collection::Object(map) => match self.read_string(item) {
                    Some(key) => Ok(map.contains_key(key)),
                    None => Err(Error::type_mismatch(
                        &[ValueKind::String],
                        self.kind_of(item),
                    )),
                },
            },
            Value::Range {
                begin,
                end,
                inclusive,
            } => match item.as_integer() {
                Some(n) => Ok(n >= *begin && (n < *end || (*inclusive && n == *end))),
                None => Ok(false),
            },
            Value::CharRange {
                begin,
                end,
                inclusive,
            } => {
                let Some(s) = self.read_string(item) else {
                    return Ok(false);
                };
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c >= *begin && (c < *end || (*inclusive && c == *end))),
                    _ => Ok(false),
                }
            }
            _ => Err(Error::type_mismatch(
                &[
                    ValueKind::String,
                    ValueKind::List,
                    ValueKind::Object,
                    ValueKind::Range,
                ],
                self.kind_of(container),
            )),
        }
    }

    // ---- printing --------------------------------------------------------

    /// The printable form: strings render raw. This is what `say` emits.
    pub fn display_value(&self, v: &Value) -> String {
        let mut out = String::new();
        self.format_value(v, false, &mut HashSet::new(), &mut out);
        out
    }

    /// The debug form: strings are quoted. Used for elements inside
    /// containers and for diagnostics.
    pub fn debug_value(&self, v: &Value) -> String {
        let mut out = String::new();
        self.format_value(v, true, &mut HashSet::new(), &mut out);
        out
    }

    fn format_value(
        &self,
        v: &Value,
        quoted: bool,
        visited: &mut HashSet<u32>,
        out: &mut String,
    ) {
        use std::fmt::Write as _;
        match v {
            Value::Null => out.push_str("null"),
            Value::Boolean(b) => {
                let _ = write!(out, "{}", b);
            }
            Value::Integer(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Float(x) => {
                let _ = write!(out, "{}", x);
            }
            Value::Reference(r) => {
                // Revisiting a bound collection means a cycle.
                if let Ref::Bound(id) = r {
                    if !visited.insert(id.0) {
                        out.push_str("...");
                        return;
                    }
                }
                match self.resolve_ref(r) {
                    Collection::String(s) => {
                        if quoted {
                            let _ = write!(out, "{:?}", s);
                        } else {
                            out.push_str(s);
                        }
                    }
                    Collection::List(items) => {
                        out.push('[');
                        for (i, p) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            self.format_value(self.read(*p), true, visited, out);
                        }
                        out.push(']');
                    }
                    Collection::Object(map) => {
                        out.push('{');
                        for (i, (key, p)) in map.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            let _ = write!(out, "{}: ", key);
                            self.format_value(self.read(*p), true, visited, out);
                        }
                        out.push('}');
                    }
                }
                if let Ref::Bound(id) = r {
                    visited.remove(&id.0);
                }
            }
            Value::Closure { entry, .. } => match entry {
                crate::value::Entry::Code(label) => {
                    let _ = write!(out, "<closure L{}>", label);
                }
                crate::value::Entry::Builtin(b) => {
                    let _ = write!(out, "<builtin {}>", b.name());
                }
            },
            Value::BoundMethod { method, .. } => {
                let _ = write!(out, "<method {}>", method.name());
            }
            Value::Regex { pattern, flags } => {
                let _ = write!(out, "/{}/{}", pattern, flags);
            }
            Value::IntSubscript {
                begin,
                end,
                extended,
            } => {
                if *extended {
                    let _ = write!(out, "[{}:", begin);
                    if let Some(end) = end {
                        let _ = write!(out, "{}", end);
                    }
                    out.push(']');
                } else {
                    let _ = write!(out, "[{}]", begin);
                }
            }
            Value::KeySubscript(key) => {
                let _ = write!(out, ".{}", key);
            }
            Value::Range {
                begin,
                end,
                inclusive,
            } => {
                let _ = write!(out, "{}..{}{}", begin, if *inclusive { "=" } else { "" }, end);
            }
            Value::CharRange {
                begin,
                end,
                inclusive,
            } => {
                let _ = write!(
                    out,
                    "'{}'..{}'{}'",
                    begin,
                    if *inclusive { "=" } else { "" },
                    end
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Entry;

    #[test]
    fn test_allocate_and_read() {
        let mut mem = Memory::new();
        let p = mem.allocate(Value::Integer(42));
        assert_eq!(mem.read(p), &Value::Integer(42));
    }

    #[test]
    fn test_copy_solidifies_pending_reference() {
        let mut mem = Memory::new();
        let pending = Value::Reference(Ref::Pending(Box::new(Collection::String(
            "abc".to_string(),
        ))));
        let constant = mem.push_static(pending);
        let a = mem.copy(constant);
        let b = mem.copy(constant);
        // Two loads of the same literal must not share a collection.
        let (ia, ib) = match (mem.read(a), mem.read(b)) {
            (Value::Reference(Ref::Bound(ia)), Value::Reference(Ref::Bound(ib))) => (*ia, *ib),
            other => panic!("expected bound references, got {:?}", other),
        };
        assert_ne!(ia, ib);
    }

    #[test]
    fn test_frame_layout_and_locals() {
        let mut mem = Memory::new();
        let caller = mem.allocate(Value::Null);
        let args = mem.allocate(Value::Null);
        let captures = mem.allocate(Value::Null);
        mem.push_frame(7, caller, args, captures);
        assert_eq!(mem.local(0).unwrap(), caller);
        assert_eq!(mem.local(1).unwrap(), args);
        assert_eq!(mem.local(2).unwrap(), captures);
        assert_eq!(mem.pop_frame().unwrap(), 7);
        assert_eq!(mem.stack_len(), 0);
    }

    #[test]
    fn test_nested_frames_restore_base_pointer() {
        let mut mem = Memory::new();
        let null = mem.allocate(Value::Null);
        mem.push_frame(1, null, null, null);
        let x = mem.allocate(Value::Integer(5));
        mem.push(x);
        mem.push_frame(2, null, null, null);
        assert_eq!(mem.pop_frame().unwrap(), 2);
        // The outer frame's operand is intact.
        assert_eq!(mem.pop().unwrap(), x);
        assert_eq!(mem.pop_frame().unwrap(), 1);
    }

    #[test]
    fn test_structural_equality_on_lists() {
        let mut mem = Memory::new();
        let a = mem.alloc_list(vec![Value::Integer(1), Value::Integer(2)]);
        let b = mem.alloc_list(vec![Value::Integer(1), Value::Integer(2)]);
        let c = mem.alloc_list(vec![Value::Integer(1), Value::Integer(3)]);
        assert!(mem.values_equal(&a, &b));
        assert!(!mem.values_equal(&a, &c));
    }

    #[test]
    fn test_numeric_equality_coerces() {
        let mem = Memory::new();
        assert!(mem.values_equal(&Value::Integer(1), &Value::Float(1.0)));
        assert!(mem.values_equal(&Value::Boolean(true), &Value::Integer(1)));
        assert!(!mem.values_equal(&Value::Integer(1), &Value::Null));
    }

    #[test]
    fn test_display_forms() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("hi");
        assert_eq!(mem.display_value(&s), "hi");
        assert_eq!(mem.debug_value(&s), "\"hi\"");
        let inner = mem.alloc_string("x");
        let list = mem.alloc_list(vec![Value::Integer(1), inner]);
        assert_eq!(mem.display_value(&list), "[1, \"x\"]");
    }

    #[test]
    fn test_cyclic_display_terminates() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Null]);
        let Value::Reference(Ref::Bound(id)) = list.clone() else {
            panic!("expected bound list");
        };
        let self_ptr = mem.allocate(list.clone());
        match mem.collection_mut(id) {
            Collection::List(items) => items[0] = self_ptr,
            _ => unreachable!(),
        }
        assert_eq!(mem.display_value(&list), "[...]");
    }

    #[test]
    fn test_contains_variants() {
        let mut mem = Memory::new();
        let hay = mem.alloc_string("hello world");
        let needle = mem.alloc_string("world");
        assert!(mem.contains(&hay, &needle).unwrap());
        let range = Value::Range {
            begin: 1,
            end: 5,
            inclusive: false,
        };
        assert!(mem.contains(&range, &Value::Integer(4)).unwrap());
        assert!(!mem.contains(&range, &Value::Integer(5)).unwrap());
    }

    #[test]
    fn test_closure_equality_is_identity_like() {
        let mem = Memory::new();
        let a = Value::Closure {
            captures: Ref::Bound(CollectionId(0)),
            entry: Entry::Code(3),
        };
        let b = Value::Closure {
            captures: Ref::Bound(CollectionId(0)),
            entry: Entry::Code(3),
        };
        let c = Value::Closure {
            captures: Ref::Bound(CollectionId(1)),
            entry: Entry::Code(3),
        };
        assert!(mem.values_equal(&a, &b));
        assert!(!mem.values_equal(&a, &c));
    }
}
