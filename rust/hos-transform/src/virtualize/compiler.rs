//! IR → bytecode compiler.
//!
//! Supported: literals other than tuples, locals, unary and binary operators,
//! `Select`, lazily cached expressions, calls to module functions and
//! builtins, and every terminator. Anything else is rejected with the name of
//! the construct so the caller can leave the function as IR.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use hos_core::ir::{BlockId, Callee, Expr, ExprId, Function, LocalId, Stmt, Terminator};

use hos_vm::{Constant, ConstantPool, Instruction, OpCode, Program};

use super::slots::SlotMap;

pub type CompileResult<T> = std::result::Result<T, &'static str>;

struct Compiler<'f> {
    func: &'f Function,
    pool: ConstantPool,
    code: Vec<Instruction>,
    slots: SlotMap,
    /// Lazy cell → (flag slot, cache slot).
    cells: BTreeMap<u32, (u32, u32)>,
    labels: BTreeMap<BlockId, u32>,
    /// Instruction indices whose first operand is a block label.
    fixups: Vec<(usize, BlockId)>,
}

impl<'f> Compiler<'f> {
    fn emit(&mut self, instr: Instruction) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn push_const(&mut self, c: Constant) {
        let k = self.pool.intern(c);
        self.emit(Instruction::op1(OpCode::PushConst, k));
    }

    fn jump_to_block(&mut self, op: OpCode, target: BlockId) {
        let at = self.emit(Instruction::op1(op, 0));
        self.fixups.push((at, target));
    }

    fn local(&self, id: LocalId) -> CompileResult<u32> {
        self.slots.local(id).ok_or("local out of range")
    }

    fn cell(&mut self, cell: u32) -> (u32, u32) {
        if let Some(&slots) = self.cells.get(&cell) {
            return slots;
        }
        let slots = (self.slots.scratch(), self.slots.scratch());
        self.cells.insert(cell, slots);
        slots
    }

    fn expr(&mut self, id: ExprId) -> CompileResult<()> {
        let func = self.func;
        match func.expr(id) {
            Expr::Lit(lit) => {
                let c = Constant::from_literal(lit).ok_or("tuple literal")?;
                self.push_const(c);
            }
            Expr::Local(l) => {
                let slot = self.local(*l)?;
                self.emit(Instruction::op1(OpCode::LoadLocal, slot));
            }
            Expr::Unary { op, operand } => {
                self.expr(*operand)?;
                self.emit(Instruction::op0(OpCode::from_unop(*op)));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.expr(*lhs)?;
                self.expr(*rhs)?;
                self.emit(Instruction::op0(OpCode::from_binop(*op)));
            }
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => {
                self.expr(*cond)?;
                let to_else = self.emit(Instruction::op1(OpCode::JumpIfFalse, 0));
                self.expr(*then_value)?;
                let to_end = self.emit(Instruction::op1(OpCode::Jump, 0));
                self.code[to_else].operands[0] = self.here();
                self.expr(*else_value)?;
                self.code[to_end].operands[0] = self.here();
            }
            Expr::Call { callee, args } => {
                for a in args {
                    self.expr(*a)?;
                }
                let argc = args.len() as u32;
                let instr = match callee {
                    Callee::Function(fid) => Instruction::op2(OpCode::Call, fid.0, argc),
                    Callee::Builtin(b) => Instruction::op2(OpCode::CallBuiltin, b.id(), argc),
                };
                self.emit(instr);
            }
            Expr::Lazy { cell, init } => {
                let (flag, cache) = self.cell(*cell);
                self.emit(Instruction::op1(OpCode::LoadLocal, flag));
                let to_compute = self.emit(Instruction::op1(OpCode::JumpIfFalse, 0));
                self.emit(Instruction::op1(OpCode::LoadLocal, cache));
                let to_end = self.emit(Instruction::op1(OpCode::Jump, 0));
                self.code[to_compute].operands[0] = self.here();
                self.expr(*init)?;
                self.emit(Instruction::op0(OpCode::Dup));
                self.emit(Instruction::op1(OpCode::StoreLocal, cache));
                self.push_const(Constant::Bool(true));
                self.emit(Instruction::op1(OpCode::StoreLocal, flag));
                self.code[to_end].operands[0] = self.here();
            }
            Expr::TableLoad { .. } => return Err("encoding table load"),
            Expr::Decrypt { .. } => return Err("encrypted string"),
            Expr::VmCall { .. } => return Err("nested bytecode call"),
        }
        Ok(())
    }

    fn block(&mut self, b: BlockId) -> CompileResult<()> {
        let func = self.func;
        let block = func.block(b);
        if !block.handlers.is_empty() {
            return Err("exception handler");
        }
        self.labels.insert(b, self.here());
        for stmt in &block.stmts {
            match stmt {
                Stmt::Assign { local, value } => {
                    self.expr(*value)?;
                    let slot = self.local(*local)?;
                    self.emit(Instruction::op1(OpCode::StoreLocal, slot));
                }
                Stmt::Eval(e) => {
                    self.expr(*e)?;
                    self.emit(Instruction::op0(OpCode::Pop));
                }
            }
        }
        match &block.term {
            Terminator::Jump(t) => self.jump_to_block(OpCode::Jump, *t),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(*cond)?;
                self.jump_to_block(OpCode::JumpIfFalse, *else_block);
                self.jump_to_block(OpCode::Jump, *then_block);
            }
            Terminator::Switch {
                scrutinee,
                cases,
                default,
            } => {
                self.expr(*scrutinee)?;
                let tmp = self.slots.scratch();
                self.emit(Instruction::op1(OpCode::StoreLocal, tmp));
                for (key, target) in cases {
                    self.emit(Instruction::op1(OpCode::LoadLocal, tmp));
                    self.push_const(Constant::Int(*key));
                    self.emit(Instruction::op0(OpCode::Ne));
                    self.jump_to_block(OpCode::JumpIfFalse, *target);
                }
                self.jump_to_block(OpCode::Jump, *default);
            }
            Terminator::Return(value) => {
                match value {
                    Some(e) => self.expr(*e)?,
                    None => self.push_const(Constant::Unit),
                }
                self.emit(Instruction::op0(OpCode::Return));
            }
            Terminator::Raise { tag, payload } => {
                self.expr(*payload)?;
                self.emit(Instruction::op1(OpCode::Raise, tag.0));
            }
        }
        Ok(())
    }
}

/// Compiles `func`. Slot assignment and block layout are drawn from `rng`.
pub fn compile<R: Rng>(func: &Function, rng: &mut R) -> CompileResult<Program> {
    let mut c = Compiler {
        func,
        pool: ConstantPool::new(),
        code: Vec::new(),
        slots: SlotMap::shuffled(func.locals.len(), rng),
        cells: BTreeMap::new(),
        labels: BTreeMap::new(),
        fixups: Vec::new(),
    };

    // Arguments arrive on the stack in order, so they are stored last first.
    for p in func.params.iter().rev() {
        let slot = c.local(*p)?;
        c.emit(Instruction::op1(OpCode::StoreLocal, slot));
    }
    let cells: Vec<u32> = (0..func.lazy_cells()).collect();
    for cell in cells {
        let (flag, _) = c.cell(cell);
        c.push_const(Constant::Bool(false));
        c.emit(Instruction::op1(OpCode::StoreLocal, flag));
    }
    c.jump_to_block(OpCode::Jump, func.entry);

    let mut order = func.reachable_blocks();
    order.shuffle(rng);
    for b in order {
        c.block(b)?;
    }

    for (at, target) in std::mem::take(&mut c.fixups) {
        let ip = *c.labels.get(&target).ok_or("jump to unreachable block")?;
        c.code[at].operands[0] = ip;
    }
    Ok(Program::new(c.pool.into_entries(), c.code))
}
