//! Loop state-flag rewriting.
//!
//! A loop whose header tests its own exit condition
//!
//! ```text
//! h: if cond { body } else { exit }
//! ```
//!
//! becomes a loop driven by a boolean local:
//!
//! ```text
//! pre:   state = true; goto guard
//! guard: if state { h } else { exit }
//! h:     if cond { body } else { stop }
//! stop:  state = false; goto guard
//! ```
//!
//! Back edges go to `guard`, edges from outside the loop go to `pre`.

use std::collections::VecDeque;

use hos_core::ir::{Block, BlockId, Function, Literal, Stmt, Terminator};

use crate::context::PassContext;

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

/// Blocks on some cycle through `h`.
fn natural_loop(f: &Function, h: BlockId, reachable: &[BlockId]) -> Vec<bool> {
    let from_h = reach(f, h);
    let mut body = vec![false; f.blocks.len()];
    for &b in reachable {
        if from_h[b.index()] && reach(f, b)[h.index()] {
            body[b.index()] = true;
        }
    }
    body
}

/// The exit side of `h`'s branch when exactly one side stays in the loop.
fn exit_of(f: &Function, h: BlockId, body: &[bool]) -> Option<BlockId> {
    let Terminator::Branch {
        then_block,
        else_block,
        ..
    } = f.block(h).term
    else {
        return None;
    };
    match (body[then_block.index()], body[else_block.index()]) {
        (true, false) => Some(else_block),
        (false, true) => Some(then_block),
        _ => None,
    }
}

fn rewrite(f: &mut Function, h: BlockId, exit: BlockId, body: &[bool]) {
    let state = f.add_local(format!("s{}", f.locals.len()));

    let on = f.lit(Literal::Bool(true));
    let guard_cond = f.local(state);
    let guard = f.add_block(Block::new(
        Vec::new(),
        Terminator::Branch {
            cond: guard_cond,
            then_block: h,
            else_block: exit,
        },
    ));
    let pre = f.add_block(Block::new(
        vec![Stmt::Assign { local: state, value: on }],
        Terminator::Jump(guard),
    ));
    let off = f.lit(Literal::Bool(false));
    let stop = f.add_block(Block::new(
        vec![Stmt::Assign { local: state, value: off }],
        Terminator::Jump(guard),
    ));

    for (index, block) in f.blocks.iter_mut().enumerate() {
        let id = BlockId(index as u32);
        if id == guard {
            continue;
        }
        let inside = body.get(index).copied().unwrap_or(false);
        for target in block.successors_mut() {
            if *target == h {
                *target = if inside { guard } else { pre };
            }
        }
    }
    if let Terminator::Branch {
        then_block,
        else_block,
        ..
    } = &mut f.block_mut(h).term
    {
        for side in [then_block, else_block] {
            if *side == exit {
                *side = stop;
            }
        }
    }
    if f.entry == h {
        f.entry = pre;
    }
}

/// Rewrites each loop header with probability `intensity`. Returns the
/// number of rewritten loops.
pub fn run_function(f: &mut Function, intensity: f64, cx: &mut PassContext) -> usize {
    let headers = f.reachable_blocks();
    let mut rewritten = 0;
    for h in headers {
        let reachable = f.reachable_blocks();
        let body = natural_loop(f, h, &reachable);
        let Some(exit) = exit_of(f, h, &body) else {
            continue;
        };
        if !cx.chance(intensity) {
            continue;
        }
        rewrite(f, h, exit, &body);
        rewritten += 1;
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Seed;
    use hos_core::ir::{BinOp, Builtin, Callee, Expr, Module};
    use hos_core::Value;

    /// `i = 0; while i < n { print(i); i = i + 1 } return i`
    fn counter() -> Function {
        let mut f = Function::new("count");
        f.exported = true;
        let n = f.add_param("n");
        let i = f.add_local("i");
        let zero = f.int(0);
        let ie = f.local(i);
        let ne = f.local(n);
        let cond = f.binary(BinOp::Lt, ie, ne);
        let ie = f.local(i);
        let print = f.add_expr(Expr::Call {
            callee: Callee::Builtin(Builtin::Print),
            args: vec![ie],
        });
        let ie = f.local(i);
        let one = f.int(1);
        let next = f.binary(BinOp::Add, ie, one);
        let ie = f.local(i);

        let done = f.add_block(Block::new(vec![], Terminator::Return(Some(ie))));
        let step = f.add_block(Block::new(
            vec![Stmt::Eval(print), Stmt::Assign { local: i, value: next }],
            Terminator::Jump(BlockId(2)),
        ));
        let header = f.add_block(Block::new(
            vec![],
            Terminator::Branch {
                cond,
                then_block: step,
                else_block: done,
            },
        ));
        f.entry = f.add_block(Block::new(
            vec![Stmt::Assign { local: i, value: zero }],
            Terminator::Jump(header),
        ));
        f
    }

    fn module(f: Function) -> Module {
        let mut m = Module::new("loops.hos");
        m.functions.push(f);
        m
    }

    #[test]
    fn test_loop_behaves_the_same() {
        let original = module(counter());
        let mut m = original.clone();
        let mut cx = PassContext::new(Seed::new(3).file_rng("loops.hos"), [0; 32], "loops.hos");
        assert_eq!(run_function(&mut m.functions[0], 1.0, &mut cx), 1);
        assert!(m.validate().is_ok());
        assert_eq!(m.functions[0].blocks.len(), 7);
        for n in [0, 1, 5] {
            assert_eq!(
                hos_rt::execute(&original, "count", vec![Value::Int(n)]).unwrap(),
                hos_rt::execute(&m, "count", vec![Value::Int(n)]).unwrap(),
                "n = {n}"
            );
        }
    }

    #[test]
    fn test_header_exit_goes_through_state_flag() {
        let mut f = counter();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        run_function(&mut f, 1.0, &mut cx);
        let Terminator::Branch { else_block, .. } = f.block(BlockId(2)).term else {
            panic!("header lost its branch");
        };
        assert!(matches!(
            &f.block(else_block).stmts[..],
            [Stmt::Assign { value, .. }] if *f.expr(*value) == Expr::Lit(Literal::Bool(false))
        ));
        // The step block loops back through the guard, not the header.
        assert!(matches!(f.block(BlockId(1)).term, Terminator::Jump(BlockId(4))));
    }

    #[test]
    fn test_loop_at_entry_gets_a_preheader() {
        // entry: if x < 3 { x = x + 1; goto entry } else { return x }
        let mut f = Function::new("climb");
        f.exported = true;
        let x = f.add_param("x");
        let xe = f.local(x);
        let three = f.int(3);
        let cond = f.binary(BinOp::Lt, xe, three);
        let xe = f.local(x);
        let one = f.int(1);
        let next = f.binary(BinOp::Add, xe, one);
        let xe = f.local(x);
        let done = f.add_block(Block::new(vec![], Terminator::Return(Some(xe))));
        let step = f.add_block(Block::new(
            vec![Stmt::Assign { local: x, value: next }],
            Terminator::Jump(BlockId(2)),
        ));
        f.entry = f.add_block(Block::new(
            vec![],
            Terminator::Branch {
                cond,
                then_block: step,
                else_block: done,
            },
        ));
        let original = module(f);
        let mut m = original.clone();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        assert_eq!(run_function(&mut m.functions[0], 1.0, &mut cx), 1);
        assert_ne!(m.functions[0].entry, BlockId(2));
        for x in [-2, 3, 9] {
            assert_eq!(
                hos_rt::execute(&original, "climb", vec![Value::Int(x)]).unwrap(),
                hos_rt::execute(&m, "climb", vec![Value::Int(x)]).unwrap()
            );
        }
    }

    #[test]
    fn test_straight_line_code_has_no_loops() {
        let mut f = Function::new("f");
        let exit = f.add_block(Block::new(vec![], Terminator::Return(None)));
        let cond = f.lit(Literal::Bool(true));
        f.entry = f.add_block(Block::new(
            vec![],
            Terminator::Branch {
                cond,
                then_block: exit,
                else_block: exit,
            },
        ));
        let before = f.clone();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        assert_eq!(run_function(&mut f, 1.0, &mut cx), 0);
        assert_eq!(f, before);
    }
}
