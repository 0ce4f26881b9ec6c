//! Stop-the-world tracing collector.
//!
//! The object graph is bipartite: heap cells carry values (which may name
//! collections), and collections carry heap pointers back into the heap.
//! Collection is a breadth-first walk across both sides, followed by a
//! compaction that relocates survivors and rewrites every pointer and
//! collection id the walk visited: in statics, stack slots, and whatever
//! external roots the VM hands in (iterator stack, access views, register).
//!
//! Correctness never depends on when a collection runs; the VM triggers it
//! on heap-growth thresholds at jump checkpoints.

use crate::memory::{Memory, Slot};
use crate::pointer::{CollectionId, Pointer, Region};
use crate::value::{Collection, Ref, Value};

/// Roots owned by the VM rather than the memory itself. The collector
/// rewrites them in place.
#[derive(Default)]
pub struct ExternalRoots<'a> {
    pub pointers: Vec<&'a mut Pointer>,
    pub collections: Vec<&'a mut CollectionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub live_cells: usize,
    pub freed_cells: usize,
    pub live_collections: usize,
    pub freed_collections: usize,
}

enum Item {
    Cell(usize),
    Col(usize),
}

impl Memory {
    /// Trace from the full root set and compact heap and pool.
    pub fn collect_garbage(&mut self, mut roots: ExternalRoots<'_>) -> GcStats {
        let mut live_cells = vec![false; self.heap.len()];
        let mut live_cols = vec![false; self.pool.len()];
        let mut work: Vec<Item> = Vec::new();

        {
            let mut mark_ptr = |p: Pointer, work: &mut Vec<Item>| {
                if p.region() == Region::Heap && !live_cells[p.offset()] {
                    live_cells[p.offset()] = true;
                    work.push(Item::Cell(p.offset()));
                }
            };

            // Statics stay put but everything they reach is live.
            for v in &self.statics {
                trace_value(v, &mut mark_ptr, &mut live_cols, &mut work);
            }
            for slot in &self.stack {
                if let Slot::Ptr(p) = slot {
                    mark_ptr(*p, &mut work);
                }
            }
            for p in &roots.pointers {
                mark_ptr(**p, &mut work);
            }
            for id in &roots.collections {
                if !live_cols[id.index()] {
                    live_cols[id.index()] = true;
                    work.push(Item::Col(id.index()));
                }
            }

            while let Some(item) = work.pop() {
                match item {
                    Item::Cell(i) => {
                        trace_value(&self.heap[i], &mut mark_ptr, &mut live_cols, &mut work)
                    }
                    Item::Col(i) => match &self.pool[i] {
                        Collection::String(_) => {}
                        Collection::List(items) => {
                            for p in items {
                                mark_ptr(*p, &mut work);
                            }
                        }
                        Collection::Object(map) => {
                            for p in map.values() {
                                mark_ptr(*p, &mut work);
                            }
                        }
                    },
                }
            }
        }

        // Forwarding maps, in index order so compaction is stable.
        let mut cell_map = vec![u32::MAX; self.heap.len()];
        let mut next = 0u32;
        for (i, live) in live_cells.iter().enumerate() {
            if *live {
                cell_map[i] = next;
                next += 1;
            }
        }
        let live_cell_count = next as usize;

        let mut col_map = vec![u32::MAX; self.pool.len()];
        let mut next = 0u32;
        for (i, live) in live_cols.iter().enumerate() {
            if *live {
                col_map[i] = next;
                next += 1;
            }
        }
        let live_col_count = next as usize;

        let stats = GcStats {
            live_cells: live_cell_count,
            freed_cells: self.heap.len() - live_cell_count,
            live_collections: live_col_count,
            freed_collections: self.pool.len() - live_col_count,
        };

        // Relocate survivors, rewriting as we go.
        let old_heap = std::mem::take(&mut self.heap);
        self.heap = Vec::with_capacity(live_cell_count);
        for (i, mut v) in old_heap.into_iter().enumerate() {
            if live_cells[i] {
                rewrite_value(&mut v, &cell_map, &col_map);
                self.heap.push(v);
            }
        }

        let old_pool = std::mem::take(&mut self.pool);
        self.pool = Vec::with_capacity(live_col_count);
        for (i, mut c) in old_pool.into_iter().enumerate() {
            if live_cols[i] {
                rewrite_collection(&mut c, &cell_map);
                self.pool.push(c);
            }
        }

        for v in &mut self.statics {
            rewrite_value(v, &cell_map, &col_map);
        }
        for slot in &mut self.stack {
            if let Slot::Ptr(p) = slot {
                *p = forward_ptr(*p, &cell_map);
            }
        }
        for p in &mut roots.pointers {
            **p = forward_ptr(**p, &cell_map);
        }
        for id in &mut roots.collections {
            **id = CollectionId(col_map[id.index()]);
        }

        stats
    }
}

fn forward_ptr(p: Pointer, cell_map: &[u32]) -> Pointer {
    match p.region() {
        Region::Heap => Pointer::heap(cell_map[p.offset()]),
        Region::Static => p,
    }
}

fn trace_value(
    v: &Value,
    mark_ptr: &mut impl FnMut(Pointer, &mut Vec<Item>),
    live_cols: &mut [bool],
    work: &mut Vec<Item>,
) {
    match v {
        Value::Reference(r) | Value::Closure { captures: r, .. } => match r {
            Ref::Bound(id) => {
                if !live_cols[id.index()] {
                    live_cols[id.index()] = true;
                    work.push(Item::Col(id.index()));
                }
            }
            // A pending collection holds its payload inline; only its
            // slot pointers (if any) need tracing.
            Ref::Pending(c) => match c.as_ref() {
                Collection::String(_) => {}
                Collection::List(items) => {
                    for p in items {
                        mark_ptr(*p, work);
                    }
                }
                Collection::Object(map) => {
                    for p in map.values() {
                        mark_ptr(*p, work);
                    }
                }
            },
        },
        Value::BoundMethod { receiver, .. } => mark_ptr(*receiver, work),
        _ => {}
    }
}

fn rewrite_value(v: &mut Value, cell_map: &[u32], col_map: &[u32]) {
    match v {
        Value::Reference(r) | Value::Closure { captures: r, .. } => {
            if let Ref::Bound(id) = r {
                *id = CollectionId(col_map[id.index()]);
            } else if let Ref::Pending(c) = r {
                rewrite_collection(c, cell_map);
            }
        }
        Value::BoundMethod { receiver, .. } => {
            *receiver = forward_ptr(*receiver, cell_map);
        }
        _ => {}
    }
}

fn rewrite_collection(c: &mut Collection, cell_map: &[u32]) {
    match c {
        Collection::String(_) => {}
        Collection::List(items) => {
            for p in items {
                *p = forward_ptr(*p, cell_map);
            }
        }
        Collection::Object(map) => {
            for p in map.values_mut() {
                *p = forward_ptr(*p, cell_map);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Entry;

    #[test]
    fn test_unreachable_cells_are_freed() {
        let mut mem = Memory::new();
        mem.allocate(Value::Integer(1));
        mem.allocate(Value::Integer(2));
        let stats = mem.collect_garbage(ExternalRoots::default());
        assert_eq!(stats.live_cells, 0);
        assert_eq!(stats.freed_cells, 2);
        assert_eq!(mem.heap_len(), 0);
    }

    #[test]
    fn test_static_roots_keep_their_graph() {
        let mut mem = Memory::new();
        let garbage = mem.alloc_string("garbage");
        let _ = garbage;
        let list = mem.alloc_list(vec![Value::Integer(7)]);
        mem.push_static(list.clone());
        let stats = mem.collect_garbage(ExternalRoots::default());
        assert_eq!(stats.live_collections, 1);
        assert_eq!(stats.live_cells, 1);
        // The surviving reference was rewritten to the compacted id.
        let survivor = mem.read(Pointer::static_slot(0)).clone();
        let Value::Reference(Ref::Bound(id)) = survivor else {
            panic!("expected bound reference");
        };
        match mem.collection(id) {
            Collection::List(items) => {
                assert_eq!(mem.read(items[0]), &Value::Integer(7));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_stack_slots_are_roots_and_rewritten() {
        let mut mem = Memory::new();
        for _ in 0..10 {
            mem.allocate(Value::Null);
        }
        let kept = mem.allocate(Value::Integer(42));
        mem.push(kept);
        mem.collect_garbage(ExternalRoots::default());
        let relocated = mem.pop().unwrap();
        assert_eq!(relocated.offset(), 0);
        assert_eq!(mem.read(relocated), &Value::Integer(42));
    }

    #[test]
    fn test_external_roots_are_rewritten() {
        let mut mem = Memory::new();
        mem.allocate(Value::Null);
        let mut held = mem.allocate(Value::Integer(9));
        mem.collect_garbage(ExternalRoots {
            pointers: vec![&mut held],
            collections: vec![],
        });
        assert_eq!(mem.read(held), &Value::Integer(9));
        assert_eq!(mem.heap_len(), 1);
    }

    #[test]
    fn test_cycles_survive_exactly_once() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Null]);
        let Value::Reference(Ref::Bound(id)) = list.clone() else {
            panic!();
        };
        let self_ptr = mem.allocate(list.clone());
        match mem.collection_mut(id) {
            Collection::List(items) => items[0] = self_ptr,
            _ => unreachable!(),
        }
        mem.push_static(list);
        let stats = mem.collect_garbage(ExternalRoots::default());
        assert_eq!(stats.live_collections, 1);
        // Run again; a tracing collector is unbothered by the cycle.
        let stats = mem.collect_garbage(ExternalRoots::default());
        assert_eq!(stats.live_collections, 1);
        assert_eq!(stats.freed_collections, 0);
    }

    #[test]
    fn test_closure_captures_are_traced() {
        let mut mem = Memory::new();
        let cell = mem.allocate(Value::Integer(5));
        let captures = mem.put_collection(Collection::List(vec![cell]));
        let closure = Value::Closure {
            captures: Ref::Bound(captures),
            entry: Entry::Code(0),
        };
        mem.push_static(closure);
        let stats = mem.collect_garbage(ExternalRoots::default());
        assert_eq!(stats.live_cells, 1);
        assert_eq!(stats.live_collections, 1);
    }
}
