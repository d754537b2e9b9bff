//! Dynamic calculation: a literal becomes `a * b + c` evaluated lazily on
//! first use and cached in a per-invocation cell. Only wrapping integer
//! arithmetic on literals is emitted, so re-evaluation is idempotent.

use rand::Rng;

use hos_core::ir::{BinOp, Expr, ExprId, Function, UnOp};

/// Factors `(a, b, c)` with `a * b + c == value` under wrapping arithmetic.
pub fn factors<R: Rng>(value: i64, rng: &mut R) -> (i64, i64, i64) {
    let a: i64 = rng.gen_range(2..=0xffff);
    let b: i64 = rng.gen_range(-0x7fff_ffff..=0x7fff_ffff);
    let c = value.wrapping_sub(a.wrapping_mul(b));
    (a, b, c)
}

fn calculation(f: &mut Function, value: i64, rng: &mut impl Rng) -> ExprId {
    let (a, b, c) = factors(value, rng);
    let a = f.int(a);
    let b = f.int(b);
    let product = f.binary(BinOp::Mul, a, b);
    let c = f.int(c);
    f.binary(BinOp::Add, product, c)
}

pub fn dynamic_int_at<R: Rng>(f: &mut Function, id: ExprId, value: i64, cell: u32, rng: &mut R) {
    let init = calculation(f, value, rng);
    f.exprs[id.index()] = Expr::Lazy { cell, init };
}

pub fn dynamic_float_at<R: Rng>(f: &mut Function, id: ExprId, value: f64, cell: u32, rng: &mut R) {
    let bits = calculation(f, value.to_bits() as i64, rng);
    let init = f.unary(UnOp::FloatFromBits, bits);
    f.exprs[id.index()] = Expr::Lazy { cell, init };
}
