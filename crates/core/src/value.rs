//! The tagged value model.
//!
//! Scalars (`Null`, booleans, integers, floats) and the small structural
//! values (subscripts, ranges, regexes) are copied by value. Strings,
//! lists, and objects live in the collection pool and are reached through
//! [`Ref`]; copying a reference shares the collection.
//!
//! A reference starts out *pending* when the code generator bakes a
//! literal collection into the static pool. Copying a pending reference
//! solidifies it: a fresh collection is inserted into the pool, so literal
//! constants can never be mutated through a view.

use crate::builtin::Builtin;
use crate::pointer::{CollectionId, Pointer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pool-side storage for the three collection shapes.
///
/// List and object slots hold heap pointers, never inline values; the
/// collector relies on this when it walks the heap/pool graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Collection {
    String(String),
    List(Vec<Pointer>),
    /// Keyed map. `BTreeMap` keeps printing and serialization deterministic.
    Object(BTreeMap<String, Pointer>),
}

impl Collection {
    pub fn len(&self) -> usize {
        match self {
            Collection::String(s) => s.chars().count(),
            Collection::List(items) => items.len(),
            Collection::Object(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Collection::String(s) => s.is_empty(),
            Collection::List(items) => items.is_empty(),
            Collection::Object(map) => map.is_empty(),
        }
    }
}

/// A handle to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ref {
    /// Not yet in any pool; produced by the code generator for literals.
    Pending(Box<Collection>),
    /// Bound into the collection pool of the owning memory.
    Bound(CollectionId),
}

/// Where a closure's code lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    /// A label in the program text.
    Code(u32),
    /// A built-in procedure on the host side.
    Builtin(Builtin),
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// A string, list, or object, by reference.
    Reference(Ref),
    /// Code plus the captured cells of its creation site.
    Closure { captures: Ref, entry: Entry },
    /// A built-in procedure bound to a receiver cell.
    BoundMethod { method: Builtin, receiver: Pointer },
    /// A regex, kept as source until the runtime compiles it.
    Regex { pattern: String, flags: String },
    /// Index or slice produced by `SUBSCRIPT_PUSH`.
    IntSubscript {
        begin: i64,
        end: Option<i64>,
        /// True for slices (`[a:b]`, `[a:]`), false for a plain index.
        extended: bool,
    },
    /// Key access produced by `SUBSCRIPT_PUSH` on a string operand.
    KeySubscript(String),
    Range { begin: i64, end: i64, inclusive: bool },
    CharRange { begin: char, end: char, inclusive: bool },
}

impl Value {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_)
        )
    }

    /// The integer view of a boolean or integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(*b as i64),
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Boolean(b) => Some(*b as i64 as f64),
            Value::Integer(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }
}

/// Both operands of an arithmetic operation, promoted to a common kind.
///
/// The coercion ladder is Bool < Int < Float: booleans widen to integers,
/// and anything paired with a float widens to float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericPair {
    Integers(i64, i64),
    Floats(f64, f64),
}

/// Promote two arithmetic values. `None` when either is non-arithmetic.
pub fn numeric_pair(a: &Value, b: &Value) -> Option<NumericPair> {
    if !a.is_arithmetic() || !b.is_arithmetic() {
        return None;
    }
    match (a, b) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            Some(NumericPair::Floats(a.as_float()?, b.as_float()?))
        }
        _ => Some(NumericPair::Integers(a.as_integer()?, b.as_integer()?)),
    }
}

/// The kind of a value, with references resolved to their collection shape.
/// Used in diagnostics and for method dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    List,
    Object,
    Closure,
    Method,
    Regex,
    Subscript,
    Range,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Object => "object",
            ValueKind::Closure => "closure",
            ValueKind::Method => "method",
            ValueKind::Regex => "regex",
            ValueKind::Subscript => "subscript",
            ValueKind::Range => "range",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booleans_promote_to_integers() {
        let pair = numeric_pair(&Value::Boolean(true), &Value::Integer(4));
        assert_eq!(pair, Some(NumericPair::Integers(1, 4)));
    }

    #[test]
    fn test_float_operand_promotes_both() {
        let pair = numeric_pair(&Value::Integer(2), &Value::Float(0.5));
        assert_eq!(pair, Some(NumericPair::Floats(2.0, 0.5)));
    }

    #[test]
    fn test_non_arithmetic_refuses_promotion() {
        assert_eq!(numeric_pair(&Value::Null, &Value::Integer(1)), None);
    }

    #[test]
    fn test_collection_length_counts_chars() {
        let c = Collection::String("héllo".to_string());
        assert_eq!(c.len(), 5);
    }
}
