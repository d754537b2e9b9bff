//! Instruction substitution.
//!
//! Every rule is an identity under the shared operator semantics for all
//! operand types, including which exception tag a type mismatch raises.
//! Rules that reorder or duplicate an operand require the operand to be pure.
//! Reordering additionally needs one side that cannot raise, so the first
//! exception observed stays the same.

use rand::Rng;

use hos_core::ir::{BinOp, Expr, ExprId, Function, UnOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// a + b → a - (-b), a - b → a + (-b)
    NegateRhs,
    /// a op b → b op' a, for commutative ops and mirrored comparisons
    Swap,
    /// a == b → !(a != b), a != b → !(a == b)
    NotInverse,
    /// Bitwise identities through the other two bitwise ops.
    Bitwise,
}

fn candidates(op: BinOp, pure: bool, reorderable: bool) -> Vec<Rule> {
    let mut rules = Vec::new();
    match op {
        BinOp::Add | BinOp::Sub => rules.push(Rule::NegateRhs),
        BinOp::Eq | BinOp::Ne => rules.push(Rule::NotInverse),
        BinOp::BitXor | BinOp::BitAnd | BinOp::BitOr if pure => rules.push(Rule::Bitwise),
        _ => {}
    }
    let swappable = matches!(
        op,
        BinOp::Add
            | BinOp::Mul
            | BinOp::Eq
            | BinOp::Ne
            | BinOp::BitXor
            | BinOp::BitAnd
            | BinOp::BitOr
            | BinOp::Lt
            | BinOp::Le
            | BinOp::Gt
            | BinOp::Ge
    );
    if pure && reorderable && swappable {
        rules.push(Rule::Swap);
    }
    rules
}

fn mirrored(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Gt => BinOp::Lt,
        BinOp::Le => BinOp::Ge,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

fn bitwise(f: &mut Function, op: BinOp, lhs: ExprId, rhs: ExprId) -> Expr {
    let (lhs2, rhs2) = (f.deep_clone(lhs), f.deep_clone(rhs));
    let (first, second, combine) = match op {
        // a ^ b → (a | b) - (a & b)
        BinOp::BitXor => (BinOp::BitOr, BinOp::BitAnd, BinOp::Sub),
        // a & b → (a | b) - (a ^ b)
        BinOp::BitAnd => (BinOp::BitOr, BinOp::BitXor, BinOp::Sub),
        // a | b → (a ^ b) + (a & b)
        _ => (BinOp::BitXor, BinOp::BitAnd, BinOp::Add),
    };
    let lhs = f.binary(first, lhs, rhs);
    let rhs = f.binary(second, lhs2, rhs2);
    Expr::Binary {
        op: combine,
        lhs,
        rhs,
    }
}

/// Rewrites the binary expression at `id` with one applicable rule chosen
/// at random. Returns whether a rule applied.
pub fn substitute_at<R: Rng>(f: &mut Function, id: ExprId, rng: &mut R) -> bool {
    let (op, lhs, rhs) = match *f.expr(id) {
        Expr::Binary { op, lhs, rhs } => (op, lhs, rhs),
        _ => return false,
    };
    let pure = f.is_pure(lhs) && f.is_pure(rhs);
    let atom = |e: ExprId| matches!(f.expr(e), Expr::Lit(_) | Expr::Local(_));
    let reorderable = atom(lhs) || atom(rhs);
    let rules = candidates(op, pure, reorderable);
    if rules.is_empty() {
        return false;
    }
    let replacement = match rules[rng.gen_range(0..rules.len())] {
        Rule::NegateRhs => {
            let neg = f.unary(UnOp::Neg, rhs);
            let flipped = if op == BinOp::Add { BinOp::Sub } else { BinOp::Add };
            Expr::Binary {
                op: flipped,
                lhs,
                rhs: neg,
            }
        }
        Rule::Swap => Expr::Binary {
            op: mirrored(op),
            lhs: rhs,
            rhs: lhs,
        },
        Rule::NotInverse => {
            let inverse = if op == BinOp::Eq { BinOp::Ne } else { BinOp::Eq };
            let inner = f.binary(inverse, lhs, rhs);
            Expr::Unary {
                op: UnOp::Not,
                operand: inner,
            }
        }
        Rule::Bitwise => bitwise(f, op, lhs, rhs),
    };
    f.exprs[id.index()] = replacement;
    true
}
