//! Memory image serialization and the update-time merge.
//!
//! An image carries everything a saved program needs to run again:
//! bytecode, label table, statics, the collection pool, and the symbol
//! table. The heap is transient per run, so collection slots are inlined
//! as owned values on the way out and re-allocated onto a fresh heap on
//! the way in. The format is schema-tagged so the merge path can refuse
//! images it does not understand.

use crate::error::{Error, Result};
use crate::gc::ExternalRoots;
use crate::memory::Memory;
use crate::pointer::{CollectionId, Pointer};
use crate::value::{Collection, Entry, Ref, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current image schema. Bump on any layout change.
pub const IMAGE_SCHEMA: u32 = 1;

/// A collection with its slots inlined as owned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageCollection {
    String(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryImage {
    pub schema: u32,
    pub text: Vec<crate::bytecode::ByteCode>,
    pub labels: Vec<usize>,
    pub statics: Vec<Value>,
    pub pool: Vec<ImageCollection>,
    /// Name to static pointer, sorted by name for determinism.
    pub symbols: Vec<(String, Pointer)>,
}

impl MemoryImage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<MemoryImage> {
        let image: MemoryImage = bincode::deserialize(bytes)?;
        if image.schema != IMAGE_SCHEMA {
            return Err(Error::image(format!(
                "unsupported image schema {} (expected {})",
                image.schema, IMAGE_SCHEMA
            )));
        }
        Ok(image)
    }
}

/// Strip values that cannot outlive the run they were made in. A bound
/// method holds a heap pointer and the heap is not serialized.
fn sanitize(v: &Value) -> Value {
    match v {
        Value::BoundMethod { .. } => Value::Null,
        other => other.clone(),
    }
}

impl Memory {
    /// Snapshot this memory. Runs a collection first so only the graph
    /// reachable from statics is written; call between runs, when the
    /// stack is quiescent.
    pub fn to_image(&mut self) -> Result<MemoryImage> {
        if self.stack_len() != 0 {
            return Err(Error::internal("cannot image a memory mid-run"));
        }
        self.collect_garbage(ExternalRoots::default());

        let pool = self
            .pool
            .iter()
            .map(|c| match c {
                Collection::String(s) => ImageCollection::String(s.clone()),
                Collection::List(items) => {
                    ImageCollection::List(items.iter().map(|p| sanitize(self.read(*p))).collect())
                }
                Collection::Object(map) => ImageCollection::Object(
                    map.iter()
                        .map(|(k, p)| (k.clone(), sanitize(self.read(*p))))
                        .collect(),
                ),
            })
            .collect();

        let mut symbols: Vec<(String, Pointer)> = self
            .symbols
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        symbols.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(MemoryImage {
            schema: IMAGE_SCHEMA,
            text: self.text.clone(),
            labels: self.labels.clone(),
            statics: self.statics.iter().map(sanitize).collect(),
            pool,
            symbols,
        })
    }

    /// Reconstitute a memory from an image, reallocating collection slots
    /// onto a fresh heap.
    pub fn from_image(image: MemoryImage) -> Result<Memory> {
        let mut mem = Memory::from_parts(
            image.text,
            image.labels,
            image.statics,
            image.symbols.into_iter().collect(),
        );
        for col in image.pool {
            let rebuilt = match col {
                ImageCollection::String(s) => Collection::String(s),
                ImageCollection::List(values) => {
                    Collection::List(values.into_iter().map(|v| mem.allocate(v)).collect())
                }
                ImageCollection::Object(map) => Collection::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, mem.allocate(v)))
                        .collect(),
                ),
            };
            mem.put_collection(rebuilt);
        }
        for (name, p) in &mem.symbols {
            if p.is_heap() || p.offset() >= mem.statics_len() {
                return Err(Error::image(format!("symbol '{}' points outside statics", name)));
            }
        }
        Ok(mem)
    }

    /// Merge an older image into this freshly compiled memory, keeping the
    /// old program's named globals. Same-name statics are substituted into
    /// the new slot; names the new code no longer declares are appended
    /// with fresh static pointers. The old pool is relocated wholesale.
    ///
    /// Closures from the old image are dropped to `Null`: their entry
    /// labels index code that no longer exists.
    pub fn merge_image(&mut self, old: MemoryImage) -> Result<()> {
        if old.schema != IMAGE_SCHEMA {
            return Err(Error::image(format!(
                "unsupported image schema {} (expected {})",
                old.schema, IMAGE_SCHEMA
            )));
        }
        let base = self.pool.len() as u32;

        for col in &old.pool {
            let rebuilt = match col {
                ImageCollection::String(s) => Collection::String(s.clone()),
                ImageCollection::List(values) => Collection::List(
                    values
                        .iter()
                        .map(|v| {
                            let v = relocate(v, base);
                            self.allocate(v)
                        })
                        .collect(),
                ),
                ImageCollection::Object(map) => Collection::Object(
                    map.iter()
                        .map(|(k, v)| {
                            let v = relocate(v, base);
                            (k.clone(), self.allocate(v))
                        })
                        .collect(),
                ),
            };
            self.put_collection(rebuilt);
        }

        for (name, old_ptr) in &old.symbols {
            if old_ptr.is_heap() || old_ptr.offset() >= old.statics.len() {
                return Err(Error::image(format!("symbol '{}' points outside statics", name)));
            }
            let value = relocate(&old.statics[old_ptr.offset()], base);
            match self.symbols.get(name).copied() {
                Some(new_ptr) => self.write(new_ptr, value),
                None => {
                    let p = self.push_static(value);
                    self.symbols.insert(name.clone(), p);
                }
            }
        }
        Ok(())
    }
}

/// Rebase collection ids from an old image by `base`; drop code-coupled
/// values whose labels no longer mean anything. Builtin closures carry
/// no labels and pass through.
fn relocate(v: &Value, base: u32) -> Value {
    match v {
        Value::Reference(Ref::Bound(id)) => {
            Value::Reference(Ref::Bound(CollectionId(id.0 + base)))
        }
        Value::Closure {
            captures,
            entry: entry @ Entry::Builtin(_),
        } => {
            let captures = match captures {
                Ref::Bound(id) => Ref::Bound(CollectionId(id.0 + base)),
                pending => pending.clone(),
            };
            Value::Closure {
                captures,
                entry: *entry,
            }
        }
        Value::Closure { .. } => Value::Null,
        Value::BoundMethod { .. } => Value::Null,
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with_globals() -> Memory {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(42), Value::Integer(7)]);
        let count = Value::Integer(2);
        let lp = mem.push_static(list);
        let cp = mem.push_static(count);
        mem.symbols.insert("loved".to_string(), lp);
        mem.symbols.insert("count".to_string(), cp);
        mem
    }

    #[test]
    fn test_round_trip_preserves_globals() {
        let mut mem = memory_with_globals();
        let image = mem.to_image().unwrap();
        let bytes = image.encode().unwrap();
        let restored = Memory::from_image(MemoryImage::decode(&bytes).unwrap()).unwrap();

        let a = mem.global("loved").unwrap().clone();
        let b = restored.global("loved").unwrap().clone();
        assert_eq!(mem.display_value(&a), "[42, 7]");
        assert_eq!(restored.display_value(&b), "[42, 7]");
        assert_eq!(
            restored.global("count").unwrap(),
            &Value::Integer(2)
        );
    }

    #[test]
    fn test_decode_rejects_foreign_schema() {
        let mut mem = memory_with_globals();
        let mut image = mem.to_image().unwrap();
        image.schema = 999;
        let bytes = bincode::serialize(&image).unwrap();
        assert!(MemoryImage::decode(&bytes).is_err());
    }

    #[test]
    fn test_merge_substitutes_surviving_names() {
        let mut old = memory_with_globals();
        let old_image = old.to_image().unwrap();

        // New code re-declares `loved` (fresh empty) but not `count`.
        let mut new = Memory::new();
        let fresh = new.alloc_list(vec![]);
        let lp = new.push_static(fresh);
        new.symbols.insert("loved".to_string(), lp);

        new.merge_image(old_image).unwrap();

        let loved = new.global("loved").unwrap().clone();
        assert_eq!(new.display_value(&loved), "[42, 7]");
        // `count` was appended with a fresh static pointer.
        assert_eq!(new.global("count").unwrap(), &Value::Integer(2));
        assert!(new.symbols["count"].offset() >= 1);
    }

    #[test]
    fn test_merge_drops_stale_closures() {
        let mut old = Memory::new();
        let captures = old.put_collection(Collection::List(vec![]));
        let p = old.push_static(Value::Closure {
            captures: Ref::Bound(captures),
            entry: crate::value::Entry::Code(5),
        });
        old.symbols.insert("f".to_string(), p);
        let image = old.to_image().unwrap();

        let mut new = Memory::new();
        new.merge_image(image).unwrap();
        assert_eq!(new.global("f").unwrap(), &Value::Null);
    }

    #[test]
    fn test_mid_run_image_is_refused() {
        let mut mem = memory_with_globals();
        let p = mem.allocate(Value::Null);
        mem.push(p);
        assert!(mem.to_image().is_err());
    }
}
