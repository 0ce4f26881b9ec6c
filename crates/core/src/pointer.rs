//! Pointer encoding for the interpreter's memory regions.
//!
//! A pointer packs a 4-bit region id and a 28-bit offset into a `u32`,
//! so it fits directly into a bytecode operand. Two regions exist:
//! `HEAP` (mutable cells, transient per run) and `STATIC` (program
//! constants and named globals, persisted in memory images).
//!
//! Collections (strings, lists, objects) are not addressed by pointers;
//! they live in a separate pool keyed by [`CollectionId`].

use serde::{Deserialize, Serialize};

const OFFSET_BITS: u32 = 28;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;

/// Largest offset a pointer can carry.
pub const MAX_OFFSET: u32 = OFFSET_MASK;

const REGION_HEAP: u32 = 0;
const REGION_STATIC: u32 = 1;

/// Memory region a pointer resolves in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Mutable cells, reclaimed by the collector, transient per run.
    Heap,
    /// Program constants and named globals, live for the Memory's lifetime.
    Static,
}

/// A region-tagged cell address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer(u32);

impl Pointer {
    /// Pointer into the heap region.
    pub fn heap(offset: u32) -> Self {
        debug_assert!(offset <= OFFSET_MASK);
        Pointer((REGION_HEAP << OFFSET_BITS) | (offset & OFFSET_MASK))
    }

    /// Pointer into the static region.
    pub fn static_slot(offset: u32) -> Self {
        debug_assert!(offset <= OFFSET_MASK);
        Pointer((REGION_STATIC << OFFSET_BITS) | (offset & OFFSET_MASK))
    }

    pub fn region(self) -> Region {
        if self.0 >> OFFSET_BITS == REGION_HEAP {
            Region::Heap
        } else {
            Region::Static
        }
    }

    pub fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }

    pub fn is_heap(self) -> bool {
        self.region() == Region::Heap
    }

    /// Raw encoding, suitable for a bytecode operand.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Rebuild a pointer from a bytecode operand.
    pub fn from_bits(bits: u32) -> Self {
        Pointer(bits)
    }
}

impl std::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.region() {
            Region::Heap => write!(f, "H@{}", self.offset()),
            Region::Static => write!(f, "S@{}", self.offset()),
        }
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Index into the collection pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub u32);

impl CollectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C#{}", self.0)
    }
}
