//! Access views: l-value descriptors for composite reads and writes.
//!
//! A view is a base cell plus a chain of subscript values. Reading walks
//! the chain; writing resolves everything but the last subscript and
//! then performs the structural mutation: index update, slice
//! replacement, string splicing, or object key insertion. Because the
//! mutation happens inside the pool collection, every alias of the
//! collection observes it.
//!
//! A key subscript that does not name an object member resolves to a
//! method of the target's kind, which is how `"abc".length()` works.

use yq_core::builtin::Builtin;
use yq_core::error::{Error, Result};
use yq_core::memory::Memory;
use yq_core::pointer::Pointer;
use yq_core::value::{Collection, Ref, Value, ValueKind};

#[derive(Debug, Clone)]
pub struct AccessView {
    pub base: Pointer,
    pub path: Vec<Value>,
}

/// A normalized slice over `len` elements.
fn slice_bounds(begin: i64, end: Option<i64>, len: usize) -> (usize, usize) {
    let norm = |i: i64| -> usize {
        let i = if i < 0 { i + len as i64 } else { i };
        i.clamp(0, len as i64) as usize
    };
    let lo = norm(begin);
    let hi = match end {
        Some(e) => norm(e),
        None => len,
    };
    (lo, hi.max(lo))
}

/// A normalized index, `None` when out of range.
fn index_bounds(index: i64, len: usize) -> Option<usize> {
    let i = if index < 0 { index + len as i64 } else { index };
    if i >= 0 && (i as usize) < len {
        Some(i as usize)
    } else {
        None
    }
}

/// Apply one subscript to a value, for reading. `receiver` is the cell
/// the value was read from, used when the result is a bound method.
fn apply_subscript(
    memory: &mut Memory,
    target: &Value,
    receiver: Option<Pointer>,
    subscript: &Value,
) -> Result<Value> {
    match subscript {
        Value::KeySubscript(key) => {
            if let Value::Reference(r) = target
                && let Collection::Object(map) = memory.resolve_ref(r)
            {
                if let Some(p) = map.get(key) {
                    return Ok(memory.read(*p).clone());
                }
            }
            let kind = memory.kind_of(target);
            match Builtin::method(kind, key) {
                Some(method) => {
                    let receiver = match receiver {
                        Some(p) => p,
                        None => memory.allocate(target.clone()),
                    };
                    Ok(Value::BoundMethod { method, receiver })
                }
                // Missing object keys read as null; anything else has no
                // member namespace at all.
                None if kind == ValueKind::Object => Ok(Value::Null),
                None => Err(Error::no_such_method(kind, key.clone())),
            }
        }
        Value::IntSubscript {
            begin,
            end,
            extended,
        } => match target {
            Value::Reference(r) => match memory.resolve_ref(r).clone() {
                Collection::List(items) => {
                    if *extended {
                        let (lo, hi) = slice_bounds(*begin, *end, items.len());
                        let values: Vec<Value> = items[lo..hi]
                            .iter()
                            .map(|p| memory.read(*p).clone())
                            .collect();
                        Ok(memory.alloc_list(values))
                    } else {
                        match index_bounds(*begin, items.len()) {
                            Some(i) => Ok(memory.read(items[i]).clone()),
                            None => Ok(Value::Null),
                        }
                    }
                }
                Collection::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    if *extended {
                        let (lo, hi) = slice_bounds(*begin, *end, chars.len());
                        let text: String = chars[lo..hi].iter().collect();
                        Ok(memory.alloc_string(text))
                    } else {
                        match index_bounds(*begin, chars.len()) {
                            Some(i) => Ok(memory.alloc_string(chars[i].to_string())),
                            None => Ok(Value::Null),
                        }
                    }
                }
                Collection::Object(_) => Err(Error::type_mismatch(
                    &[ValueKind::List, ValueKind::String],
                    ValueKind::Object,
                )),
            },
            other => Err(Error::type_mismatch(
                &[ValueKind::List, ValueKind::String],
                memory.kind_of(other),
            )),
        },
        other => Err(Error::internal(format!(
            "view extended with a non-subscript: {:?}",
            other
        ))),
    }
}

/// Read through the whole view.
pub fn get(memory: &mut Memory, view: &AccessView) -> Result<Value> {
    let mut current = memory.read(view.base).clone();
    let mut receiver = Some(view.base);
    for subscript in &view.path {
        current = apply_subscript(memory, &current, receiver, subscript)?;
        receiver = None;
    }
    Ok(current)
}

/// Resolve the view to the heap cell of its final slot. Only index and
/// key subscripts over lists and objects designate cells.
pub fn get_ref(memory: &mut Memory, view: &AccessView) -> Result<Pointer> {
    let (container, last) = resolve_container(memory, view)?;
    match (&container, &last) {
        (Value::Reference(Ref::Bound(id)), Value::IntSubscript { begin, extended: false, .. }) => {
            match memory.collection(*id) {
                Collection::List(items) => match index_bounds(*begin, items.len()) {
                    Some(i) => Ok(items[i]),
                    None => Err(Error::builtin(format!("index {} out of range", begin))),
                },
                other => Err(Error::type_mismatch(
                    &[ValueKind::List],
                    kind_of_collection(other),
                )),
            }
        }
        (Value::Reference(Ref::Bound(id)), Value::KeySubscript(key)) => {
            match memory.collection(*id) {
                Collection::Object(map) => match map.get(key) {
                    Some(p) => Ok(*p),
                    None => Err(Error::builtin(format!("object has no key '{}'", key))),
                },
                other => Err(Error::type_mismatch(
                    &[ValueKind::Object],
                    kind_of_collection(other),
                )),
            }
        }
        _ => Err(Error::type_mismatch(
            &[ValueKind::List, ValueKind::Object],
            memory.kind_of(&container),
        )),
    }
}

/// Write through the view, mutating the final container structurally.
pub fn set(memory: &mut Memory, view: &AccessView, rhs: Value) -> Result<()> {
    let (container, last) = resolve_container(memory, view)?;
    let Value::Reference(Ref::Bound(id)) = container else {
        return Err(Error::type_mismatch(
            &[ValueKind::List, ValueKind::String, ValueKind::Object],
            memory.kind_of(&container),
        ));
    };
    match last {
        Value::KeySubscript(key) => {
            let cell = memory.allocate(rhs);
            match memory.collection_mut(id) {
                Collection::Object(map) => {
                    map.insert(key, cell);
                    Ok(())
                }
                other => Err(Error::type_mismatch(
                    &[ValueKind::Object],
                    kind_of_collection(other),
                )),
            }
        }
        Value::IntSubscript {
            begin,
            end,
            extended: false,
        } => {
            debug_assert!(end.is_none());
            match memory.collection(id) {
                Collection::List(items) => {
                    let i = index_bounds(begin, items.len()).ok_or_else(|| {
                        Error::builtin(format!("index {} out of range", begin))
                    })?;
                    let cell = memory.allocate(rhs);
                    match memory.collection_mut(id) {
                        Collection::List(items) => items[i] = cell,
                        _ => unreachable!(),
                    }
                    Ok(())
                }
                Collection::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let i = index_bounds(begin, chars.len()).ok_or_else(|| {
                        Error::builtin(format!("index {} out of range", begin))
                    })?;
                    splice_string(memory, id, i, i + 1, rhs)
                }
                Collection::Object(_) => Err(Error::type_mismatch(
                    &[ValueKind::List, ValueKind::String],
                    ValueKind::Object,
                )),
            }
        }
        Value::IntSubscript {
            begin,
            end,
            extended: true,
        } => match memory.collection(id) {
            Collection::List(items) => {
                let (lo, hi) = slice_bounds(begin, end, items.len());
                let elements = match &rhs {
                    Value::Reference(r) => match memory.resolve_ref(r) {
                        Collection::List(slots) => slots.clone(),
                        _ => {
                            return Err(Error::type_mismatch(
                                &[ValueKind::List],
                                memory.kind_of(&rhs),
                            ));
                        }
                    },
                    _ => {
                        return Err(Error::type_mismatch(
                            &[ValueKind::List],
                            memory.kind_of(&rhs),
                        ));
                    }
                };
                // Fresh cells, so the target never aliases the source list.
                let cells: Vec<Pointer> = elements
                    .iter()
                    .map(|p| memory.copy(*p))
                    .collect();
                match memory.collection_mut(id) {
                    Collection::List(items) => {
                        items.splice(lo..hi, cells);
                        Ok(())
                    }
                    _ => unreachable!(),
                }
            }
            Collection::String(s) => {
                let len = s.chars().count();
                let (lo, hi) = slice_bounds(begin, end, len);
                splice_string(memory, id, lo, hi, rhs)
            }
            Collection::Object(_) => Err(Error::type_mismatch(
                &[ValueKind::List, ValueKind::String],
                ValueKind::Object,
            )),
        },
        other => Err(Error::internal(format!(
            "view extended with a non-subscript: {:?}",
            other
        ))),
    }
}

/// Walk every subscript but the last; the write target must end up a
/// collection reference.
fn resolve_container(memory: &mut Memory, view: &AccessView) -> Result<(Value, Value)> {
    let Some((last, init)) = view.path.split_last() else {
        return Err(Error::internal("empty access view"));
    };
    let mut current = memory.read(view.base).clone();
    let mut receiver = Some(view.base);
    for subscript in init {
        current = apply_subscript(memory, &current, receiver, subscript)?;
        receiver = None;
    }
    Ok((current, last.clone()))
}

/// Replace the character range `[lo, hi)` with the printable form of
/// `rhs`, in place.
fn splice_string(
    memory: &mut Memory,
    id: yq_core::pointer::CollectionId,
    lo: usize,
    hi: usize,
    rhs: Value,
) -> Result<()> {
    let replacement = memory.display_value(&rhs);
    match memory.collection_mut(id) {
        Collection::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let mut out: String = chars[..lo].iter().collect();
            out.push_str(&replacement);
            out.extend(&chars[hi.min(chars.len())..]);
            *s = out;
            Ok(())
        }
        _ => Err(Error::internal("string splice on a non-string")),
    }
}

fn kind_of_collection(c: &Collection) -> ValueKind {
    match c {
        Collection::String(_) => ValueKind::String,
        Collection::List(_) => ValueKind::List,
        Collection::Object(_) => ValueKind::Object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_of(mem: &mut Memory, v: Value, path: Vec<Value>) -> AccessView {
        let base = mem.allocate(v);
        AccessView { base, path }
    }

    fn index(i: i64) -> Value {
        Value::IntSubscript {
            begin: i,
            end: None,
            extended: false,
        }
    }

    fn slice(lo: i64, hi: Option<i64>) -> Value {
        Value::IntSubscript {
            begin: lo,
            end: hi,
            extended: true,
        }
    }

    #[test]
    fn test_index_read_and_negative_index() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(10), Value::Integer(20)]);
        let view = view_of(&mut mem, list.clone(), vec![index(1)]);
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Integer(20));
        let view = view_of(&mut mem, list.clone(), vec![index(-1)]);
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Integer(20));
        let view = view_of(&mut mem, list, vec![index(5)]);
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Null);
    }

    #[test]
    fn test_slice_replacement_grows_list() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
        ]);
        let rhs = mem.alloc_list(vec![Value::Integer(9), Value::Integer(9)]);
        let view = view_of(&mut mem, list.clone(), vec![slice(1, Some(2))]);
        set(&mut mem, &view, rhs).unwrap();
        assert_eq!(mem.display_value(&list), "[1, 9, 9, 3]");
    }

    #[test]
    fn test_string_splice_in_place() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("hello");
        let x = mem.alloc_string("EY");
        let view = view_of(&mut mem, s.clone(), vec![slice(1, Some(3))]);
        set(&mut mem, &view, x).unwrap();
        assert_eq!(mem.display_value(&s), "hEYlo");
    }

    #[test]
    fn test_object_key_insert_and_missing_read() {
        let mut mem = Memory::new();
        let id = mem.put_collection(Collection::Object(Default::default()));
        let obj = Value::Reference(Ref::Bound(id));
        let view = view_of(
            &mut mem,
            obj.clone(),
            vec![Value::KeySubscript("a".to_string())],
        );
        set(&mut mem, &view, Value::Integer(5)).unwrap();
        let view = view_of(
            &mut mem,
            obj.clone(),
            vec![Value::KeySubscript("a".to_string())],
        );
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Integer(5));
        let view = view_of(&mut mem, obj, vec![Value::KeySubscript("zzz".to_string())]);
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Null);
    }

    #[test]
    fn test_method_binding_on_string() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("abc");
        let view = view_of(&mut mem, s, vec![Value::KeySubscript("length".to_string())]);
        match get(&mut mem, &view).unwrap() {
            Value::BoundMethod {
                method: Builtin::Length,
                ..
            } => {}
            other => panic!("expected bound length, got {:?}", other),
        }
    }

    #[test]
    fn test_no_such_method() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("abc");
        let view = view_of(&mut mem, s, vec![Value::KeySubscript("explode".to_string())]);
        assert!(matches!(
            get(&mut mem, &view),
            Err(Error::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn test_get_ref_resolves_list_slot() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(1)]);
        let view = view_of(&mut mem, list.clone(), vec![index(0)]);
        let slot = get_ref(&mut mem, &view).unwrap();
        assert_eq!(mem.read(slot), &Value::Integer(1));
    }

    #[test]
    fn test_nested_path() {
        let mut mem = Memory::new();
        let inner = mem.alloc_list(vec![Value::Integer(7)]);
        let outer = mem.alloc_list(vec![inner]);
        let view = view_of(&mut mem, outer, vec![index(0), index(0)]);
        assert_eq!(get(&mut mem, &view).unwrap(), Value::Integer(7));
    }
}
