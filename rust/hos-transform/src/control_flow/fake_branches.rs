//! Opaque-predicate branches.
//!
//! `Jump(t)` becomes `Branch(((v * (v + 1)) & 1) == 0, t, decoy)`. The
//! product of two consecutive integers is even, and parity survives wrapping
//! multiplication, so the predicate is always true and the decoy never runs.

use rand::Rng;

use hos_core::ir::{BinOp, Block, BlockId, ExprId, Function, Stmt, Terminator};

use crate::context::PassContext;
use crate::instruction::garbage;

fn opaque_true(f: &mut Function, rng: &mut impl Rng) -> (Stmt, ExprId) {
    let v = f.add_local(format!("p{}", f.locals.len()));
    let seed = f.int(rng.gen());
    let assign = Stmt::Assign { local: v, value: seed };

    let a = f.local(v);
    let b = f.local(v);
    let one = f.int(1);
    let succ = f.binary(BinOp::Add, b, one);
    let product = f.binary(BinOp::Mul, a, succ);
    let mask = f.int(1);
    let parity = f.binary(BinOp::BitAnd, product, mask);
    let zero = f.int(0);
    (assign, f.binary(BinOp::Eq, parity, zero))
}

/// Junk followed by a jump somewhere plausible.
fn decoy_block(f: &mut Function, targets: &[BlockId], rng: &mut impl Rng) -> BlockId {
    let count = rng.gen_range(1..=3);
    let stmts = garbage::junk_stmts(f, rng, count);
    let target = targets[rng.gen_range(0..targets.len())];
    f.add_block(Block::new(stmts, Terminator::Jump(target)))
}

pub fn run_function(f: &mut Function, intensity: f64, cx: &mut PassContext) -> usize {
    let reachable = f.reachable_blocks();
    let mut inserted = 0;
    for &b in &reachable {
        let Terminator::Jump(target) = f.block(b).term else {
            continue;
        };
        if !cx.chance(intensity) {
            continue;
        }
        let (assign, cond) = opaque_true(f, &mut cx.rng);
        let decoy = decoy_block(f, &reachable, &mut cx.rng);
        let block = f.block_mut(b);
        block.stmts.push(assign);
        block.term = Terminator::Branch {
            cond,
            then_block: target,
            else_block: decoy,
        };
        inserted += 1;
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Seed;
    use hos_core::ir::Expr;
    use hos_core::Value;

    fn eval(f: &Function, id: ExprId, v: i64) -> Value {
        match f.expr(id) {
            Expr::Lit(l) => Value::from(l),
            Expr::Local(_) => Value::Int(v),
            Expr::Binary { op, lhs, rhs } => {
                Value::binary(*op, &eval(f, *lhs, v), &eval(f, *rhs, v)).unwrap()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_predicate_always_true() {
        let mut f = Function::new("f");
        let mut rng = Seed::new(0).file_rng("m");
        let (_, cond) = opaque_true(&mut f, &mut rng);
        for v in [0, 1, -1, 2, i64::MAX, i64::MIN, 0x1234_5678_9abc_def1] {
            assert_eq!(eval(&f, cond, v), Value::Bool(true), "v = {v}");
        }
    }

    #[test]
    fn test_jumps_gain_decoys() {
        let mut f = Function::new("f");
        let exit = f.add_block(Block::new(vec![], Terminator::Return(None)));
        f.entry = f.add_block(Block::new(vec![], Terminator::Jump(exit)));
        let mut cx = PassContext::new(Seed::new(1).file_rng("m"), [0; 32], "m");
        assert_eq!(run_function(&mut f, 1.0, &mut cx), 1);
        assert!(f.validate().is_ok());
        assert!(matches!(
            f.block(f.entry).term,
            Terminator::Branch { then_block, .. } if then_block == exit
        ));
        assert_eq!(f.blocks.len(), 3);
    }
}
