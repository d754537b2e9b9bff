//! Private instruction set for virtualized functions.
//! Stack machine: operands are popped from and results pushed to one value stack.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum_macros::{Display, EnumIter, FromRepr};

use hos_core::ir::{BinOp, Literal, UnOp};
use hos_core::Value;

/// Opcodes understood by the VM. Instructions store the raw byte so that an
/// unknown opcode survives decoding and faults at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Stack and locals
    PushConst = 0,   // k:      push constants[k]
    LoadLocal = 1,   // s:      push slots[s]
    StoreLocal = 2,  // s:      slots[s] = pop
    Pop = 3,         //         discard top
    Dup = 4,         //         duplicate top

    // Unary
    Neg = 10,
    Not = 11,
    BitNot = 12,
    FloatFromBits = 13,

    // Binary: rhs is on top, lhs below
    Add = 20,
    Sub = 21,
    Mul = 22,
    Div = 23,
    Rem = 24,
    BitAnd = 25,
    BitOr = 26,
    BitXor = 27,
    Shl = 28,
    Shr = 29,
    RotL = 30,
    RotR = 31,
    Eq = 32,
    Ne = 33,
    Lt = 34,
    Le = 35,
    Gt = 36,
    Ge = 37,

    // Control
    Jump = 40,        // t:       ip = t
    JumpIfFalse = 41, // t:       if !pop { ip = t }
    Call = 42,        // f, argc: push host.call(f, argc args)
    CallBuiltin = 43, // b, argc: push host.builtin(b, argc args)
    Return = 44,      //          return pop
    Raise = 45,       // tag:     raise tag with payload pop
}

impl OpCode {
    /// Number of operands the opcode requires.
    pub fn arity(self) -> usize {
        match self {
            OpCode::PushConst
            | OpCode::LoadLocal
            | OpCode::StoreLocal
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Raise => 1,
            OpCode::Call | OpCode::CallBuiltin => 2,
            _ => 0,
        }
    }

    pub fn from_binop(op: BinOp) -> Self {
        match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::Rem => OpCode::Rem,
            BinOp::BitAnd => OpCode::BitAnd,
            BinOp::BitOr => OpCode::BitOr,
            BinOp::BitXor => OpCode::BitXor,
            BinOp::Shl => OpCode::Shl,
            BinOp::Shr => OpCode::Shr,
            BinOp::RotL => OpCode::RotL,
            BinOp::RotR => OpCode::RotR,
            BinOp::Eq => OpCode::Eq,
            BinOp::Ne => OpCode::Ne,
            BinOp::Lt => OpCode::Lt,
            BinOp::Le => OpCode::Le,
            BinOp::Gt => OpCode::Gt,
            BinOp::Ge => OpCode::Ge,
        }
    }

    pub fn as_binop(self) -> Option<BinOp> {
        Some(match self {
            OpCode::Add => BinOp::Add,
            OpCode::Sub => BinOp::Sub,
            OpCode::Mul => BinOp::Mul,
            OpCode::Div => BinOp::Div,
            OpCode::Rem => BinOp::Rem,
            OpCode::BitAnd => BinOp::BitAnd,
            OpCode::BitOr => BinOp::BitOr,
            OpCode::BitXor => BinOp::BitXor,
            OpCode::Shl => BinOp::Shl,
            OpCode::Shr => BinOp::Shr,
            OpCode::RotL => BinOp::RotL,
            OpCode::RotR => BinOp::RotR,
            OpCode::Eq => BinOp::Eq,
            OpCode::Ne => BinOp::Ne,
            OpCode::Lt => BinOp::Lt,
            OpCode::Le => BinOp::Le,
            OpCode::Gt => BinOp::Gt,
            OpCode::Ge => BinOp::Ge,
            _ => return None,
        })
    }

    pub fn from_unop(op: UnOp) -> Self {
        match op {
            UnOp::Neg => OpCode::Neg,
            UnOp::Not => OpCode::Not,
            UnOp::BitNot => OpCode::BitNot,
            UnOp::FloatFromBits => OpCode::FloatFromBits,
        }
    }

    pub fn as_unop(self) -> Option<UnOp> {
        Some(match self {
            OpCode::Neg => UnOp::Neg,
            OpCode::Not => UnOp::Not,
            OpCode::BitNot => UnOp::BitNot,
            OpCode::FloatFromBits => UnOp::FloatFromBits,
            _ => return None,
        })
    }
}

/// One instruction record: raw opcode byte plus variable-length operands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: u8,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(op: OpCode, operands: Vec<u32>) -> Self {
        Self {
            op: op as u8,
            operands,
        }
    }

    pub fn op0(op: OpCode) -> Self {
        Self::new(op, Vec::new())
    }

    pub fn op1(op: OpCode, a: u32) -> Self {
        Self::new(op, vec![a])
    }

    pub fn op2(op: OpCode, a: u32, b: u32) -> Self {
        Self::new(op, vec![a, b])
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_repr(self.op)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "{op}")?,
            None => write!(f, "<op {:#04x}>", self.op)?,
        }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Constant {
    /// Scalar literals only; tuples have no pool representation.
    pub fn from_literal(lit: &Literal) -> Option<Self> {
        Some(match lit {
            Literal::Unit => Constant::Unit,
            Literal::Bool(b) => Constant::Bool(*b),
            Literal::Int(i) => Constant::Int(*i),
            Literal::Float(x) => Constant::Float(*x),
            Literal::Str(s) => Constant::Str(s.clone()),
            Literal::Tuple(_) => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Unit => Value::Unit,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{}", other.to_value()),
        }
    }
}

/// Hashable identity of a constant; floats compare by bit pattern so that
/// `0.0` and `-0.0` stay distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Unit,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl From<&Constant> for ConstKey {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Unit => ConstKey::Unit,
            Constant::Bool(b) => ConstKey::Bool(*b),
            Constant::Int(i) => ConstKey::Int(*i),
            Constant::Float(x) => ConstKey::Float(x.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
        }
    }
}

/// Deduplicating constant pool builder.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<ConstKey, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, c: Constant) -> u32 {
        let key = ConstKey::from(&c);
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(c);
        self.lookup.insert(key, id);
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Constant> {
        self.entries
    }
}

/// A compiled function body. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub version: u16,
    pub constants: Vec<Constant>,
    pub code: Vec<Instruction>,
}

impl Program {
    pub fn new(constants: Vec<Constant>, code: Vec<Instruction>) -> Self {
        Self {
            version: crate::codec::FORMAT_VERSION,
            constants,
            code,
        }
    }

    /// Local slots the program touches: highest slot operand plus one.
    pub fn slot_count(&self) -> usize {
        self.code
            .iter()
            .filter(|i| matches!(i.opcode(), Some(OpCode::LoadLocal | OpCode::StoreLocal)))
            .filter_map(|i| i.operands.first())
            .map(|s| *s as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Human-readable listing used by `hos inspect`.
    pub fn disassemble(&self) -> String {
        let mut out = format!(
            "; version {} | {} constants | {} instructions\n",
            self.version,
            self.constants.len(),
            self.code.len()
        );
        for (i, c) in self.constants.iter().enumerate() {
            out.push_str(&format!("  k{i:<4} {c}\n"));
        }
        for (ip, instr) in self.code.iter().enumerate() {
            out.push_str(&format!("{ip:>5}  {instr}\n"));
        }
        out
    }
}
