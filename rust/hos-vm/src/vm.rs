//! Stack interpreter for virtualized function bodies.
//!
//! Every invocation owns a fresh [`Vm`] (stack, slots, instruction pointer),
//! so nested and concurrent calls never share execution state. Calls out of
//! the program go through [`VmHost`], which may itself re-enter the VM.

use thiserror::Error;
use tracing::debug;

use hos_core::ir::{Builtin, FunctionId};
use hos_core::value::{Exception, ExceptionTag, Value};

use crate::bytecode::{OpCode, Program};
use crate::codec;

/// Corrupted or out-of-range VM state. Always fatal for the invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmFault {
    #[error("instruction pointer {ip} outside program of {len} instructions")]
    IpOutOfRange { ip: usize, len: usize },
    #[error("stack underflow at ip {ip}")]
    StackUnderflow { ip: usize },
    #[error("unknown opcode {opcode:#04x} at ip {ip}")]
    UnknownOpcode { ip: usize, opcode: u8 },
    #[error("{opcode} at ip {ip} is missing operands")]
    MissingOperand { ip: usize, opcode: OpCode },
    #[error("constant index {index} out of range at ip {ip}")]
    BadConstant { ip: usize, index: u32 },
    #[error("local slot {slot} out of range at ip {ip}")]
    BadLocal { ip: usize, slot: u32 },
    #[error("unknown builtin id {id} at ip {ip}")]
    BadBuiltin { ip: usize, id: u32 },
    #[error("program expects {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("blob truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("malformed blob at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u16),
    #[error("instruction limit exceeded: {0}")]
    StepLimit(u64),
}

/// Normal completion of program code: a value, or a raised exception.
pub type Completion = Result<Value, Exception>;

/// Services the VM needs from the embedding runtime.
pub trait VmHost {
    type Error: From<VmFault>;

    fn call_function(&mut self, func: FunctionId, args: Vec<Value>) -> Result<Completion, Self::Error>;

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Completion, Self::Error>;
}

/// Execution state of one invocation.
pub struct Vm<'p> {
    program: &'p Program,
    stack: Vec<Value>,
    slots: Vec<Value>,
    ip: usize,
    steps: u64,
    max_steps: Option<u64>,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            stack: Vec::new(),
            slots: vec![Value::Unit; program.slot_count()],
            ip: 0,
            steps: 0,
            max_steps: None,
        }
    }

    /// Caps the number of dispatched instructions. Unlimited by default.
    pub fn with_step_limit(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    fn pop(&mut self, at: usize) -> Result<Value, VmFault> {
        self.stack.pop().ok_or(VmFault::StackUnderflow { ip: at })
    }

    fn pop_n(&mut self, n: usize, at: usize) -> Result<Vec<Value>, VmFault> {
        if self.stack.len() < n {
            return Err(VmFault::StackUnderflow { ip: at });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn slot(&self, slot: u32, at: usize) -> Result<usize, VmFault> {
        let idx = slot as usize;
        if idx < self.slots.len() {
            Ok(idx)
        } else {
            Err(VmFault::BadLocal { ip: at, slot })
        }
    }

    fn jump_target(&self, target: u32, at: usize) -> Result<usize, VmFault> {
        let t = target as usize;
        if t < self.program.code.len() {
            return Ok(t);
        }
        debug!(ip = at, target = t, "jump outside program");
        Err(VmFault::IpOutOfRange {
            ip: t,
            len: self.program.code.len(),
        })
    }

    /// Runs to a `Return` or `Raise`. Arguments are pushed onto the operand
    /// stack in order before the first instruction.
    pub fn run<H: VmHost>(mut self, args: Vec<Value>, host: &mut H) -> Result<Completion, H::Error> {
        self.stack.extend(args);
        let program = self.program;
        let len = program.code.len();
        loop {
            let at = self.ip;
            let instr = program
                .code
                .get(at)
                .ok_or(VmFault::IpOutOfRange { ip: at, len })?;

            self.steps += 1;
            if let Some(limit) = self.max_steps.filter(|limit| self.steps > *limit) {
                return Err(VmFault::StepLimit(limit).into());
            }

            let op = instr.opcode().ok_or(VmFault::UnknownOpcode {
                ip: at,
                opcode: instr.op,
            })?;
            if instr.operands.len() < op.arity() {
                return Err(VmFault::MissingOperand { ip: at, opcode: op }.into());
            }
            let a = instr.operands.first().copied().unwrap_or(0);
            let b = instr.operands.get(1).copied().unwrap_or(0);
            self.ip += 1;

            match op {
                OpCode::PushConst => {
                    let c = program
                        .constants
                        .get(a as usize)
                        .ok_or(VmFault::BadConstant { ip: at, index: a })?;
                    self.stack.push(c.to_value());
                }
                OpCode::LoadLocal => {
                    let s = self.slot(a, at)?;
                    self.stack.push(self.slots[s].clone());
                }
                OpCode::StoreLocal => {
                    let s = self.slot(a, at)?;
                    self.slots[s] = self.pop(at)?;
                }
                OpCode::Pop => {
                    self.pop(at)?;
                }
                OpCode::Dup => {
                    let top = self.stack.last().cloned().ok_or(VmFault::StackUnderflow { ip: at })?;
                    self.stack.push(top);
                }
                OpCode::Jump => {
                    self.ip = self.jump_target(a, at)?;
                }
                OpCode::JumpIfFalse => {
                    let target = self.jump_target(a, at)?;
                    match self.pop(at)?.as_bool() {
                        Ok(true) => {}
                        Ok(false) => self.ip = target,
                        Err(exc) => return Ok(Err(exc)),
                    }
                }
                OpCode::Call => {
                    let args = self.pop_n(b as usize, at)?;
                    match host.call_function(FunctionId(a), args)? {
                        Ok(v) => self.stack.push(v),
                        Err(exc) => return Ok(Err(exc)),
                    }
                }
                OpCode::CallBuiltin => {
                    let builtin = Builtin::from_id(a).ok_or(VmFault::BadBuiltin { ip: at, id: a })?;
                    let args = self.pop_n(b as usize, at)?;
                    match host.call_builtin(builtin, args)? {
                        Ok(v) => self.stack.push(v),
                        Err(exc) => return Ok(Err(exc)),
                    }
                }
                OpCode::Return => {
                    let v = self.pop(at)?;
                    return Ok(Ok(v));
                }
                OpCode::Raise => {
                    let payload = self.pop(at)?;
                    return Ok(Err(Exception::new(ExceptionTag(a), payload)));
                }
                _ => {
                    if let Some(un) = op.as_unop() {
                        let v = self.pop(at)?;
                        match Value::unary(un, &v) {
                            Ok(r) => self.stack.push(r),
                            Err(exc) => return Ok(Err(exc)),
                        }
                    } else if let Some(bin) = op.as_binop() {
                        let rhs = self.pop(at)?;
                        let lhs = self.pop(at)?;
                        match Value::binary(bin, &lhs, &rhs) {
                            Ok(r) => self.stack.push(r),
                            Err(exc) => return Ok(Err(exc)),
                        }
                    } else {
                        return Err(VmFault::UnknownOpcode {
                            ip: at,
                            opcode: instr.op,
                        }
                        .into());
                    }
                }
            }
        }
    }
}

/// Runs a decoded program with a fresh execution state.
pub fn execute<H: VmHost>(program: &Program, args: Vec<Value>, host: &mut H) -> Result<Completion, H::Error> {
    Vm::new(program).run(args, host)
}

/// Decodes a persisted blob and runs it. Decoding faults fail closed.
pub fn execute_blob<H: VmHost>(bytes: &[u8], args: Vec<Value>, host: &mut H) -> Result<Completion, H::Error> {
    let program = codec::decode(bytes)?;
    execute(&program, args, host)
}
