//! Runtime values and the operator semantics shared by the IR interpreter and
//! the bytecode VM. Both execution engines route every operator through
//! [`Value::binary`] / [`Value::unary`] so that a virtualized function cannot
//! drift from its IR original.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ir::{BinOp, Builtin, Literal, UnOp};

/// Identifies the kind of a raised exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionTag(pub u32);

impl ExceptionTag {
    /// Operand of the wrong type.
    pub const TYPE_ERROR: ExceptionTag = ExceptionTag(1);
    /// Integer division or remainder by zero.
    pub const DIVISION_BY_ZERO: ExceptionTag = ExceptionTag(2);
    /// Runtime guard reported a failed integrity check.
    pub const TAMPER_DETECTED: ExceptionTag = ExceptionTag(3);
    /// Wrong number of arguments to a builtin.
    pub const ARITY_ERROR: ExceptionTag = ExceptionTag(4);
    /// Tags at or above this value are reserved for transform-synthesized
    /// control transfers and never escape the function that raises them.
    pub const SYNTHETIC_BASE: u32 = 0x8000_0000;

    pub fn is_synthetic(self) -> bool {
        self.0 >= Self::SYNTHETIC_BASE
    }
}

impl fmt::Display for ExceptionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExceptionTag::TYPE_ERROR => write!(f, "TypeError"),
            ExceptionTag::DIVISION_BY_ZERO => write!(f, "DivisionByZero"),
            ExceptionTag::TAMPER_DETECTED => write!(f, "TamperDetected"),
            ExceptionTag::ARITY_ERROR => write!(f, "ArityError"),
            ExceptionTag(n) => write!(f, "Exception#{n}"),
        }
    }
}

/// A raised program-level exception. This is program data, not a host error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub tag: ExceptionTag,
    pub payload: Value,
}

impl Exception {
    pub fn new(tag: ExceptionTag, payload: Value) -> Self {
        Self { tag, payload }
    }

    pub fn type_error() -> Self {
        Self::new(ExceptionTag::TYPE_ERROR, Value::Unit)
    }

    pub fn division_by_zero() -> Self {
        Self::new(ExceptionTag::DIVISION_BY_ZERO, Value::Unit)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tag, self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Unit => Value::Unit,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Tuple(items) => Value::Tuple(items.iter().map(Value::from).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn as_bool(&self) -> Result<bool, Exception> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(Exception::type_error()),
        }
    }

    pub fn unary(op: UnOp, v: &Value) -> Result<Value, Exception> {
        match (op, v) {
            (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
            (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnOp::BitNot, Value::Int(i)) => Ok(Value::Int(!i)),
            (UnOp::FloatFromBits, Value::Int(i)) => Ok(Value::Float(f64::from_bits(*i as u64))),
            _ => Err(Exception::type_error()),
        }
    }

    pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
        use Value::*;
        match op {
            BinOp::Eq => return Ok(Bool(lhs == rhs)),
            BinOp::Ne => return Ok(Bool(lhs != rhs)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => return compare(op, lhs, rhs),
            _ => {}
        }
        match (lhs, rhs) {
            (Int(a), Int(b)) => int_arith(op, *a, *b),
            (Float(a), Float(b)) => match op {
                BinOp::Add => Ok(Float(a + b)),
                BinOp::Sub => Ok(Float(a - b)),
                BinOp::Mul => Ok(Float(a * b)),
                BinOp::Div => Ok(Float(a / b)),
                BinOp::Rem => Ok(Float(a % b)),
                _ => Err(Exception::type_error()),
            },
            _ => Err(Exception::type_error()),
        }
    }

    /// Pure builtins. `Print` and `CheckIntegrity` are host effects and are
    /// dispatched by the execution engine instead.
    pub fn pure_builtin(builtin: Builtin, args: &[Value]) -> Result<Value, Exception> {
        let arity = Exception::new(ExceptionTag::ARITY_ERROR, Value::Unit);
        match builtin {
            Builtin::Abs => match args {
                [Value::Int(i)] => Ok(Value::Int(i.wrapping_abs())),
                [Value::Float(x)] => Ok(Value::Float(x.abs())),
                [_] => Err(Exception::type_error()),
                _ => Err(arity),
            },
            Builtin::Min | Builtin::Max => match args {
                [a, b] => {
                    let take_b = match builtin {
                        Builtin::Min => compare(BinOp::Lt, b, a)?.as_bool()?,
                        _ => compare(BinOp::Lt, a, b)?.as_bool()?,
                    };
                    Ok(if take_b { b.clone() } else { a.clone() })
                }
                _ => Err(arity),
            },
            Builtin::Print | Builtin::CheckIntegrity => Err(Exception::type_error()),
        }
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value, Exception> {
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(Exception::division_by_zero());
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(Exception::division_by_zero());
            }
            a.wrapping_rem(b)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => a.wrapping_shl((b & 63) as u32),
        BinOp::Shr => a.wrapping_shr((b & 63) as u32),
        BinOp::RotL => a.rotate_left((b & 63) as u32),
        BinOp::RotR => a.rotate_right((b & 63) as u32),
        _ => return Err(Exception::type_error()),
    };
    Ok(Value::Int(v))
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, Exception> {
    use std::cmp::Ordering;
    let ord: Option<Ordering> = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => return Err(Exception::type_error()),
    };
    // NaN compares false under every ordering operator.
    let result = match (op, ord) {
        (_, None) => false,
        (BinOp::Lt, Some(o)) => o == Ordering::Less,
        (BinOp::Le, Some(o)) => o != Ordering::Greater,
        (BinOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinOp::Ge, Some(o)) => o != Ordering::Less,
        _ => return Err(Exception::type_error()),
    };
    Ok(Value::Bool(result))
}
