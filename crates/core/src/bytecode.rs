//! The flat bytecode format.
//!
//! An instruction is an opcode plus a single `u32` operand. Jumps name
//! label ids rather than instruction indices, so forward references can be
//! patched after code generation and the label table can be serialized
//! as-is in a memory image.

use crate::pointer::Pointer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    LoadLocalPush,
    LoadLocalPushRef,
    LoadPush,
    LoadPushRef,
    PopSaveLocal,
    PopSave,
    PopAssertEq,
    ConsPush,
    ExtractList,
    SubscriptPush,
    ConsObjPush,
    PushImm,
    PopAssertEqImm,
    Action,
    Jump,
    JumpZero,
    JumpNotZero,
    JumpIfIterDone,
    JumpNotFirstRun,
    CreateClosure,
    PrepareFrame,
    GetNthArg,
    GetNthArgRef,
    PopReturn,
    Call,
    Return,
    Nop,
    Pop,
    PopSaveToReg,
    ClearReg,
    PushIterator,
    PopIterator,
    IterNextPush,
    PushAccessView,
    ExtendAccessView,
    AccessGet,
    AccessGetRef,
    AccessSet,
    BinaryOp,
    UnaryOp,
    ToBool,
    OpAssign,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteCode {
    pub op: OpCode,
    pub operand: u32,
}

impl ByteCode {
    pub fn new(op: OpCode, operand: u32) -> Self {
        ByteCode { op, operand }
    }

    pub fn plain(op: OpCode) -> Self {
        ByteCode { op, operand: 0 }
    }
}

/// Operand of `BINARY_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    In,
}

impl BinaryOp {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<BinaryOp> {
        use BinaryOp::*;
        const ALL: [BinaryOp; 14] = [
            Add, Sub, Mul, Div, Mod, Eq, Ne, Gt, Lt, Ge, Le, And, Or, In,
        ];
        ALL.get(code as usize).copied()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::In => "in",
        }
    }
}

/// Operand of `UNARY_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Not,
}

impl UnaryOp {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<UnaryOp> {
        match code {
            0 => Some(UnaryOp::Minus),
            1 => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

/// Operand of `OP_ASSIGN`: the compound assignment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<AssignOp> {
        use AssignOp::*;
        const ALL: [AssignOp; 5] = [Add, Sub, Mul, Div, Mod];
        ALL.get(code as usize).copied()
    }

    pub fn binary(self) -> BinaryOp {
        match self {
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
        }
    }
}

/// Operand of `PUSH_IMM` and `POP_ASSERT_EQ_IMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    Null,
    False,
    True,
}

impl Imm {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Imm> {
        match code {
            0 => Some(Imm::Null),
            1 => Some(Imm::False),
            2 => Some(Imm::True),
            _ => None,
        }
    }
}

/// Operand of `ACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Say,
    Nudge,
    PicSave,
    PicSend,
}

impl ActionKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<ActionKind> {
        match code {
            0 => Some(ActionKind::Say),
            1 => Some(ActionKind::Nudge),
            2 => Some(ActionKind::PicSave),
            3 => Some(ActionKind::PicSend),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ActionKind::Say => "say",
            ActionKind::Nudge => "nudge",
            ActionKind::PicSave => "picsave",
            ActionKind::PicSend => "picsend",
        }
    }
}

/// Operand of `SUBSCRIPT_PUSH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptKind {
    /// `[e]`: one index popped.
    Index,
    /// `[e:]`: one begin popped, open end.
    OpenSlice,
    /// `[a:b]`: begin and end popped.
    ClosedSlice,
}

impl SubscriptKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<SubscriptKind> {
        match code {
            0 => Some(SubscriptKind::Index),
            1 => Some(SubscriptKind::OpenSlice),
            2 => Some(SubscriptKind::ClosedSlice),
            _ => None,
        }
    }
}

impl OpCode {
    /// The assembler mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::LoadLocalPush => "LOAD_LOCAL_PUSH",
            OpCode::LoadLocalPushRef => "LOAD_LOCAL_PUSH_REF",
            OpCode::LoadPush => "LOAD_PUSH",
            OpCode::LoadPushRef => "LOAD_PUSH_REF",
            OpCode::PopSaveLocal => "POP_SAVE_LOCAL",
            OpCode::PopSave => "POP_SAVE",
            OpCode::PopAssertEq => "POP_ASSERT_EQ",
            OpCode::ConsPush => "CONS_PUSH",
            OpCode::ExtractList => "EXTRACT_LIST",
            OpCode::SubscriptPush => "SUBSCRIPT_PUSH",
            OpCode::ConsObjPush => "CONS_OBJ_PUSH",
            OpCode::PushImm => "PUSH_IMM",
            OpCode::PopAssertEqImm => "POP_ASSERT_EQ_IMM",
            OpCode::Action => "ACTION",
            OpCode::Jump => "JUMP",
            OpCode::JumpZero => "JUMP_ZERO",
            OpCode::JumpNotZero => "JUMP_NOT_ZERO",
            OpCode::JumpIfIterDone => "JUMP_IF_ITER_DONE",
            OpCode::JumpNotFirstRun => "JUMP_NOT_FIRST_RUN",
            OpCode::CreateClosure => "CREATE_CLOSURE",
            OpCode::PrepareFrame => "PREPARE_FRAME",
            OpCode::GetNthArg => "GET_NTH_ARG",
            OpCode::GetNthArgRef => "GET_NTH_ARG_REF",
            OpCode::PopReturn => "POP_RETURN",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::Nop => "NOP",
            OpCode::Pop => "POP",
            OpCode::PopSaveToReg => "POP_SAVE_TO_REG",
            OpCode::ClearReg => "CLEAR_REG",
            OpCode::PushIterator => "PUSH_ITERATOR",
            OpCode::PopIterator => "POP_ITERATOR",
            OpCode::IterNextPush => "ITER_NEXT_PUSH",
            OpCode::PushAccessView => "PUSH_ACCESS_VIEW",
            OpCode::ExtendAccessView => "EXTEND_ACCESS_VIEW",
            OpCode::AccessGet => "ACCESS_GET",
            OpCode::AccessGetRef => "ACCESS_GET_REF",
            OpCode::AccessSet => "ACCESS_SET",
            OpCode::BinaryOp => "BINARY_OP",
            OpCode::UnaryOp => "UNARY_OP",
            OpCode::ToBool => "TO_BOOL",
            OpCode::OpAssign => "OP_ASSIGN",
            OpCode::Exit => "EXIT",
        }
    }

    /// Whether the operand names a label.
    pub fn takes_label(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::JumpZero
                | OpCode::JumpNotZero
                | OpCode::JumpIfIterDone
                | OpCode::JumpNotFirstRun
                | OpCode::CreateClosure
                | OpCode::Call
        )
    }

    /// Whether the operand is a pointer.
    pub fn takes_pointer(self) -> bool {
        matches!(
            self,
            OpCode::LoadPush | OpCode::LoadPushRef | OpCode::PopSave
        )
    }
}

impl std::fmt::Display for ByteCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.op.takes_pointer() {
            write!(f, "{} {}", self.op.mnemonic(), Pointer::from_bits(self.operand))
        } else if self.op.takes_label() {
            write!(f, "{} L{}", self.op.mnemonic(), self.operand)
        } else if self.op == OpCode::BinaryOp {
            match BinaryOp::from_code(self.operand) {
                Some(op) => write!(f, "{} {}", self.op.mnemonic(), op.symbol()),
                None => write!(f, "{} ?{}", self.op.mnemonic(), self.operand),
            }
        } else if matches!(
            self.op,
            OpCode::Nop
                | OpCode::Pop
                | OpCode::PopReturn
                | OpCode::Return
                | OpCode::Exit
                | OpCode::ToBool
                | OpCode::PopAssertEq
                | OpCode::ClearReg
                | OpCode::PopSaveToReg
                | OpCode::PushIterator
                | OpCode::PopIterator
                | OpCode::IterNextPush
                | OpCode::PushAccessView
                | OpCode::ExtendAccessView
                | OpCode::AccessGet
                | OpCode::AccessGetRef
                | OpCode::AccessSet
        ) {
            f.write_str(self.op.mnemonic())
        } else {
            write!(f, "{} {}", self.op.mnemonic(), self.operand)
        }
    }
}

/// Render a full listing, with label marks interleaved before the
/// instructions they resolve to.
pub fn disassemble(text: &[ByteCode], labels: &[usize]) -> String {
    use std::fmt::Write as _;

    let mut marks: Vec<Vec<usize>> = vec![Vec::new(); text.len() + 1];
    for (id, &index) in labels.iter().enumerate() {
        if index <= text.len() {
            marks[index].push(id);
        }
    }

    let mut out = String::new();
    for (index, bc) in text.iter().enumerate() {
        for id in &marks[index] {
            let _ = writeln!(out, "L{}:", id);
        }
        let _ = writeln!(out, "  {:4}  {}", index, bc);
    }
    for id in &marks[text.len()] {
        let _ = writeln!(out, "L{}:", id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_op_codes_round_trip() {
        for code in 0..14 {
            let op = BinaryOp::from_code(code).unwrap();
            assert_eq!(op.code(), code);
        }
        assert_eq!(BinaryOp::from_code(14), None);
    }

    #[test]
    fn test_display_decodes_operands() {
        let bc = ByteCode::new(OpCode::LoadPush, Pointer::static_slot(3).bits());
        assert_eq!(bc.to_string(), "LOAD_PUSH S@3");
        let bc = ByteCode::new(OpCode::Jump, 7);
        assert_eq!(bc.to_string(), "JUMP L7");
        let bc = ByteCode::new(OpCode::BinaryOp, BinaryOp::Mul.code());
        assert_eq!(bc.to_string(), "BINARY_OP *");
    }

    #[test]
    fn test_disassemble_marks_labels() {
        let text = vec![
            ByteCode::new(OpCode::Jump, 0),
            ByteCode::plain(OpCode::Nop),
            ByteCode::plain(OpCode::Exit),
        ];
        let labels = vec![2];
        let listing = disassemble(&text, &labels);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0].trim(), "0  JUMP L0");
        assert_eq!(lines[2], "L0:");
    }
}
