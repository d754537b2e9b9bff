//! Function splitting.
//!
//! Control reaching a chosen block `b` leaves the function: `b` becomes
//! `return part(l0, l1, ..)` and `part` is a copy of the function whose
//! entry is `b` and whose parameters are all of its locals. The copy keeps
//! every block reachable from `b`, handlers included, so it runs exactly what
//! the original would have run from that point. The call is in tail position
//! with no handlers around it, so the caller's frame is reused.

use rand::Rng;
use std::collections::VecDeque;

use hos_core::ir::{Block, BlockId, Callee, Expr, Function, FunctionId, LocalId, Module, Terminator};

use crate::instruction::rename::NameGen;

/// Blocks reachable from `start`, normal and exception edges alike.
fn reach(f: &Function, start: BlockId) -> Vec<bool> {
    let mut seen = vec![false; f.blocks.len()];
    let mut queue = VecDeque::from([start]);
    seen[start.index()] = true;
    while let Some(b) = queue.pop_front() {
        for succ in f.block(b).successors() {
            if !seen[succ.index()] {
                seen[succ.index()] = true;
                queue.push_back(succ);
            }
        }
    }
    seen
}

/// Non-entry blocks whose reachable region does not lead back to the entry.
pub fn split_points(f: &Function) -> Vec<BlockId> {
    f.reachable_blocks()
        .into_iter()
        .filter(|b| *b != f.entry && !reach(f, *b)[f.entry.index()])
        .collect()
}

/// Splits function `index` at a random split point. Returns the new
/// function's name, or `None` when the function has no split point.
pub fn split_function<R: Rng>(
    module: &mut Module,
    index: usize,
    names: &mut NameGen,
    rng: &mut R,
) -> Option<String> {
    let points = split_points(&module.functions[index]);
    if points.is_empty() {
        return None;
    }
    let at = points[rng.gen_range(0..points.len())];
    let part_id = FunctionId(module.functions.len() as u32);

    let f = &mut module.functions[index];
    let mut part = f.clone();
    part.name = names.numbered(&format!("{}_part", f.name), rng);
    part.exported = false;
    part.params = (0..f.locals.len() as u32).map(LocalId).collect();
    part.entry = at;
    part.prune();

    let args = (0..f.locals.len() as u32).map(|l| f.local(LocalId(l))).collect();
    let call = f.add_expr(Expr::Call {
        callee: Callee::Function(part_id),
        args,
    });
    *f.block_mut(at) = Block::new(Vec::new(), Terminator::Return(Some(call)));
    f.prune();

    let name = part.name.clone();
    module.functions.push(part);
    Some(name)
}
