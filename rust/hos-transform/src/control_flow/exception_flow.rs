//! Exception-driven control transfer.
//!
//! A transfer out of a block is replaced by a raise of a tag synthesized for
//! that one site, caught by a handler on the same block. Because the tag is
//! unique within the file and its only handler sits on the raising block, the
//! exception never propagates past the function that raises it.

use hos_core::ir::{BlockId, ExprId, Function, Handler, Literal, LocalId, Terminator};

use crate::context::PassContext;

/// Ends `block` with a raise of a fresh synthetic tag carrying `payload`,
/// handled on the same block by a jump to `target` that binds the payload
/// to `bind`.
pub fn raise_transfer(
    f: &mut Function,
    block: BlockId,
    payload: ExprId,
    target: BlockId,
    bind: Option<LocalId>,
    cx: &mut PassContext,
) {
    let tag = cx.synthetic_tag();
    let b = f.block_mut(block);
    b.term = Terminator::Raise { tag, payload };
    b.handlers.push(Handler { tag, target, bind });
}

/// Without flattening: reroutes plain jumps, each with probability `intensity`.
pub fn reroute_jumps(f: &mut Function, intensity: f64, cx: &mut PassContext) -> usize {
    let mut rerouted = 0;
    for b in f.reachable_blocks() {
        let Terminator::Jump(target) = f.block(b).term else {
            continue;
        };
        if !cx.chance(intensity) {
            continue;
        }
        let payload = f.lit(Literal::Unit);
        raise_transfer(f, b, payload, target, None, cx);
        rerouted += 1;
    }
    rerouted
}
