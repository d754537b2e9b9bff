//! Persisted blob format.
//!
//! ```text
//! u16 LE   version
//! u32 LE   constant pool size
//!          constants: tag byte + payload
//! u32 LE   instruction count
//!          instructions: u8 opcode, varint operand count, varint operands
//! ```
//!
//! Integer constants are zigzag varints, floats are 8 raw LE bytes, strings
//! are a varint byte length followed by UTF-8. Decoding accepts every version
//! up to [`FORMAT_VERSION`]; opcodes are not checked here so that a blob from
//! a newer producer decodes and then faults only if the unknown op executes.

use crate::bytecode::{Constant, Instruction, Program};
use crate::vm::VmFault;

pub const FORMAT_VERSION: u16 = 1;

const TAG_UNIT: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn encode(program: &Program) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&program.version.to_le_bytes());
    out.extend_from_slice(&(program.constants.len() as u32).to_le_bytes());
    for c in &program.constants {
        match c {
            Constant::Unit => out.push(TAG_UNIT),
            Constant::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(*b as u8);
            }
            Constant::Int(i) => {
                out.push(TAG_INT);
                write_varint(&mut out, zigzag(*i));
            }
            Constant::Float(x) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&x.to_bits().to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(TAG_STR);
                write_varint(&mut out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
    out.extend_from_slice(&(program.code.len() as u32).to_le_bytes());
    for instr in &program.code {
        out.push(instr.op);
        write_varint(&mut out, instr.operands.len() as u64);
        for operand in &instr.operands {
            write_varint(&mut out, u64::from(*operand));
        }
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], VmFault> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(VmFault::Truncated { offset: self.pos }),
        }
    }

    fn u8(&mut self) -> Result<u8, VmFault> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, VmFault> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, VmFault> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn varint(&mut self) -> Result<u64, VmFault> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            // The tenth byte carries only bit 63.
            if shift == 63 && byte > 1 {
                return Err(VmFault::Malformed {
                    offset: start,
                    reason: "varint overflows 64 bits",
                });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(VmFault::Malformed {
            offset: start,
            reason: "varint longer than 10 bytes",
        })
    }

    fn varint_u32(&mut self) -> Result<u32, VmFault> {
        let start = self.pos;
        let v = self.varint()?;
        u32::try_from(v).map_err(|_| VmFault::Malformed {
            offset: start,
            reason: "operand exceeds u32",
        })
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

pub fn decode(bytes: &[u8]) -> Result<Program, VmFault> {
    let mut r = Reader { bytes, pos: 0 };
    let version = r.u16()?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(VmFault::UnsupportedVersion(version));
    }

    let pool_size = r.u32()? as usize;
    // Every constant occupies at least its tag byte.
    if pool_size > r.remaining() {
        return Err(VmFault::Truncated { offset: r.pos });
    }
    let mut constants = Vec::with_capacity(pool_size);
    for _ in 0..pool_size {
        let at = r.pos;
        let c = match r.u8()? {
            TAG_UNIT => Constant::Unit,
            TAG_BOOL => match r.u8()? {
                0 => Constant::Bool(false),
                1 => Constant::Bool(true),
                _ => {
                    return Err(VmFault::Malformed {
                        offset: at,
                        reason: "bool constant not 0 or 1",
                    })
                }
            },
            TAG_INT => Constant::Int(unzigzag(r.varint()?)),
            TAG_FLOAT => {
                let b = r.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Constant::Float(f64::from_bits(u64::from_le_bytes(raw)))
            }
            TAG_STR => {
                let len = r.varint()?;
                let len = usize::try_from(len).map_err(|_| VmFault::Truncated { offset: r.pos })?;
                let b = r.take(len)?;
                let s = std::str::from_utf8(b).map_err(|_| VmFault::Malformed {
                    offset: at,
                    reason: "string constant is not UTF-8",
                })?;
                Constant::Str(s.to_string())
            }
            _ => {
                return Err(VmFault::Malformed {
                    offset: at,
                    reason: "unknown constant tag",
                })
            }
        };
        constants.push(c);
    }

    let count = r.u32()? as usize;
    // Opcode byte plus operand-count byte at minimum.
    if count > r.remaining() / 2 {
        return Err(VmFault::Truncated { offset: r.pos });
    }
    let mut code = Vec::with_capacity(count);
    for _ in 0..count {
        let op = r.u8()?;
        let n = r.varint()?;
        if n > r.remaining() as u64 {
            return Err(VmFault::Truncated { offset: r.pos });
        }
        let mut operands = Vec::with_capacity(n as usize);
        for _ in 0..n {
            operands.push(r.varint_u32()?);
        }
        code.push(Instruction { op, operands });
    }

    if r.remaining() != 0 {
        return Err(VmFault::Malformed {
            offset: r.pos,
            reason: "trailing bytes after instruction stream",
        });
    }
    Ok(Program {
        version,
        constants,
        code,
    })
}
