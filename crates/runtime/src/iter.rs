//! Iterator states for `for … in` loops.
//!
//! Each `PUSH_ITERATOR` materializes one of these on the VM's iterator
//! stack. The state machine is `InLoop(cursor)` until the cursor runs
//! off the end, at which point `JUMP_IF_ITER_DONE` flips it to `Done`
//! and leaves the loop; `POP_ITERATOR` drops it.
//!
//! Lists iterate elements, strings iterate one-character strings,
//! ranges count, and objects iterate `[key, value]` pairs over a key
//! snapshot taken at loop entry (mutation during iteration affects
//! values, not the key set).

use yq_core::error::{Error, Result};
use yq_core::memory::Memory;
use yq_core::pointer::CollectionId;
use yq_core::value::{Collection, Ref, Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterPhase {
    InLoop,
    Done,
}

#[derive(Debug, Clone)]
enum Source {
    List(CollectionId),
    Str(CollectionId),
    Keys { id: CollectionId, keys: Vec<String> },
    Ints { end: i64, inclusive: bool },
    Chars { end: u32, inclusive: bool },
}

#[derive(Debug, Clone)]
pub struct IterState {
    pub phase: IterPhase,
    source: Source,
    /// Element index for collections; the next integer/code point for
    /// ranges.
    cursor: i64,
}

impl IterState {
    pub fn from_value(memory: &Memory, v: &Value) -> Result<IterState> {
        let (source, cursor) = match v {
            Value::Reference(Ref::Bound(id)) => match memory.collection(*id) {
                Collection::List(_) => (Source::List(*id), 0),
                Collection::String(_) => (Source::Str(*id), 0),
                Collection::Object(map) => (
                    Source::Keys {
                        id: *id,
                        keys: map.keys().cloned().collect(),
                    },
                    0,
                ),
            },
            Value::Range {
                begin,
                end,
                inclusive,
            } => (
                Source::Ints {
                    end: *end,
                    inclusive: *inclusive,
                },
                *begin,
            ),
            Value::CharRange {
                begin,
                end,
                inclusive,
            } => (
                Source::Chars {
                    end: *end as u32,
                    inclusive: *inclusive,
                },
                *begin as u32 as i64,
            ),
            other => {
                return Err(Error::type_mismatch(
                    &[
                        ValueKind::List,
                        ValueKind::String,
                        ValueKind::Object,
                        ValueKind::Range,
                    ],
                    memory.kind_of(other),
                ));
            }
        };
        Ok(IterState {
            phase: IterPhase::InLoop,
            source,
            cursor,
        })
    }

    pub fn is_done(&self, memory: &Memory) -> bool {
        match &self.source {
            Source::List(id) => match memory.collection(*id) {
                Collection::List(items) => self.cursor as usize >= items.len(),
                _ => true,
            },
            Source::Str(id) => match memory.collection(*id) {
                Collection::String(s) => self.cursor as usize >= s.chars().count(),
                _ => true,
            },
            Source::Keys { keys, .. } => self.cursor as usize >= keys.len(),
            Source::Ints { end, inclusive } => {
                if *inclusive {
                    self.cursor > *end
                } else {
                    self.cursor >= *end
                }
            }
            Source::Chars { end, inclusive } => {
                let cur = self.cursor as u32;
                if *inclusive { cur > *end } else { cur >= *end }
            }
        }
    }

    /// The next element; the caller must have checked `is_done`.
    pub fn next(&mut self, memory: &mut Memory) -> Result<Value> {
        let value = match &self.source {
            Source::List(id) => {
                let Collection::List(items) = memory.collection(*id) else {
                    return Err(Error::internal("list iterator over a non-list"));
                };
                match items.get(self.cursor as usize) {
                    Some(p) => memory.read(*p).clone(),
                    None => Value::Null,
                }
            }
            Source::Str(id) => {
                let Collection::String(s) = memory.collection(*id) else {
                    return Err(Error::internal("string iterator over a non-string"));
                };
                let ch: String = s
                    .chars()
                    .nth(self.cursor as usize)
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                memory.alloc_string(ch)
            }
            Source::Keys { id, keys } => {
                let key = keys[self.cursor as usize].clone();
                let value = match memory.collection(*id) {
                    Collection::Object(map) => match map.get(&key) {
                        Some(p) => memory.read(*p).clone(),
                        None => Value::Null,
                    },
                    _ => Value::Null,
                };
                let key_value = memory.alloc_string(key);
                memory.alloc_list(vec![key_value, value])
            }
            Source::Ints { .. } => Value::Integer(self.cursor),
            Source::Chars { .. } => {
                let text = char::from_u32(self.cursor as u32)
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                memory.alloc_string(text)
            }
        };
        self.advance();
        Ok(value)
    }

    fn advance(&mut self) {
        match &self.source {
            Source::Chars { end, .. } => {
                // Step to the next valid scalar value.
                let mut next = self.cursor as u32 + 1;
                while next <= *end && char::from_u32(next).is_none() {
                    next += 1;
                }
                self.cursor = next as i64;
            }
            _ => self.cursor += 1,
        }
    }

    /// The pool id this iterator pins, for the collector to trace and
    /// rewrite.
    pub fn collection_id_mut(&mut self) -> Option<&mut CollectionId> {
        match &mut self.source {
            Source::List(id) | Source::Str(id) | Source::Keys { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_iteration() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(1), Value::Integer(2)]);
        let mut it = IterState::from_value(&mem, &list).unwrap();
        assert!(!it.is_done(&mem));
        assert_eq!(it.next(&mut mem).unwrap(), Value::Integer(1));
        assert_eq!(it.next(&mut mem).unwrap(), Value::Integer(2));
        assert!(it.is_done(&mem));
    }

    #[test]
    fn test_exclusive_range_iteration() {
        let mut mem = Memory::new();
        let range = Value::Range {
            begin: 1,
            end: 4,
            inclusive: false,
        };
        let mut it = IterState::from_value(&mem, &range).unwrap();
        let mut seen = Vec::new();
        while !it.is_done(&mem) {
            seen.push(it.next(&mut mem).unwrap());
        }
        assert_eq!(
            seen,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn test_string_iterates_characters() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("ab");
        let mut it = IterState::from_value(&mem, &s).unwrap();
        let a = it.next(&mut mem).unwrap();
        assert_eq!(mem.display_value(&a), "a");
        let b = it.next(&mut mem).unwrap();
        assert_eq!(mem.display_value(&b), "b");
        assert!(it.is_done(&mem));
    }

    #[test]
    fn test_char_range_inclusive() {
        let mut mem = Memory::new();
        let range = Value::CharRange {
            begin: 'a',
            end: 'c',
            inclusive: true,
        };
        let mut it = IterState::from_value(&mem, &range).unwrap();
        let mut out = String::new();
        while !it.is_done(&mem) {
            let v = it.next(&mut mem).unwrap();
            out.push_str(&mem.display_value(&v));
        }
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_object_yields_key_value_pairs() {
        let mut mem = Memory::new();
        let one = mem.allocate(Value::Integer(1));
        let two = mem.allocate(Value::Integer(2));
        let id = mem.put_collection(Collection::Object(
            [("a".to_string(), one), ("b".to_string(), two)]
                .into_iter()
                .collect(),
        ));
        let obj = Value::Reference(Ref::Bound(id));
        let mut it = IterState::from_value(&mem, &obj).unwrap();
        let first = it.next(&mut mem).unwrap();
        assert_eq!(mem.display_value(&first), "[\"a\", 1]");
    }

    #[test]
    fn test_integers_are_not_iterable() {
        let mem = Memory::new();
        assert!(IterState::from_value(&mem, &Value::Integer(3)).is_err());
    }
}
