//! yq core: the shared foundation of the interpreter.
//!
//! Key design principles:
//! - `Value`: what programs talk about (scalars, references, closures).
//! - `Memory`: where values live, from heap and static cells to the
//!   collection pool, plus the unified call/operand stack.
//! - `ByteCode`: the flat instruction format the compiler emits and the
//!   VM dispatches; jumps resolve through a patchable label table.
//! - `MemoryImage`: the serialized form that lets a saved program keep
//!   its globals between runs and across code updates.

pub mod builtin;
pub mod bytecode;
pub mod error;
pub mod gc;
pub mod image;
pub mod memory;
pub mod pointer;
pub mod value;

pub use builtin::Builtin;
pub use bytecode::{
    ActionKind, AssignOp, BinaryOp, ByteCode, Imm, OpCode, SubscriptKind, UnaryOp, disassemble,
};
pub use error::{Error, Result};
pub use gc::{ExternalRoots, GcStats};
pub use image::{IMAGE_SCHEMA, ImageCollection, MemoryImage};
pub use memory::{Memory, Slot};
pub use pointer::{CollectionId, MAX_OFFSET, Pointer, Region};
pub use value::{Collection, Entry, NumericPair, Ref, Value, ValueKind, numeric_pair};
