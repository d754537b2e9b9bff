//! Runtime Guard injection points.
//!
//! A guarded block is split in two: the original id becomes a check that
//! calls the host's `CheckIntegrity` builtin, and its former contents move to
//! a fresh block entered only when the check passes. A failed check raises
//! `TAMPER_DETECTED`. Keeping the original id means no edge needs remapping.

use tracing::debug;

use hos_core::ir::{Block, BlockId, Builtin, Callee, Expr, Function, Literal, Module, Terminator};
use hos_core::value::ExceptionTag;

use crate::context::PassContext;
use crate::error::Result;

fn guard_block(f: &mut Function, target: BlockId, tamper: BlockId) {
    let moved = std::mem::replace(
        f.block_mut(target),
        Block::new(Vec::new(), Terminator::Return(None)),
    );
    let body = f.add_block(moved);
    let cond = f.add_expr(Expr::Call {
        callee: Callee::Builtin(Builtin::CheckIntegrity),
        args: Vec::new(),
    });
    *f.block_mut(target) = Block::new(
        Vec::new(),
        Terminator::Branch {
            cond,
            then_block: body,
            else_block: tamper,
        },
    );
}

fn tamper_block(f: &mut Function) -> BlockId {
    let payload = f.lit(Literal::Unit);
    f.add_block(Block::new(
        Vec::new(),
        Terminator::Raise {
            tag: ExceptionTag::TAMPER_DETECTED,
            payload,
        },
    ))
}

pub fn run(module: &mut Module, intensity: f64, cx: &mut PassContext) -> Result<bool> {
    let mut changed = false;
    for f in &mut module.functions {
        let reachable = f.reachable_blocks();
        if reachable.is_empty() {
            continue;
        }
        let tamper = tamper_block(f);
        let mut guarded = 0usize;
        for b in reachable {
            if b == f.entry || cx.chance(intensity) {
                guard_block(f, b, tamper);
                guarded += 1;
            }
        }
        debug!(function = %f.name, guarded, "guard injection");
        changed = true;
    }
    Ok(changed)
}
