//! Constant splitting: a numeric literal becomes `k` sub-values recombined at
//! runtime by wrapping addition, XOR, or XOR followed by a rotation. Floats
//! are split through their IEEE-754 bit pattern, so reconstruction is
//! bit-exact for every value including NaN payloads and signed zero.

use rand::Rng;

use hos_core::ir::{BinOp, Expr, ExprId, Function, UnOp};

/// Number of sub-values at a given intensity: `2 + floor(3t)`.
pub fn part_count(intensity: f64) -> usize {
    2 + (3.0 * intensity.clamp(0.0, 1.0)).floor() as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combiner {
    Add,
    Xor,
    /// XOR the parts, then rotate left by the amount.
    Rotate(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub combiner: Combiner,
    pub parts: Vec<i64>,
}

impl Split {
    /// Reference reconstruction, mirroring the emitted expression.
    pub fn reconstruct(&self) -> i64 {
        match self.combiner {
            Combiner::Add => self.parts.iter().fold(0i64, |acc, p| acc.wrapping_add(*p)),
            Combiner::Xor => self.parts.iter().fold(0i64, |acc, p| acc ^ p),
            Combiner::Rotate(r) => self.parts.iter().fold(0i64, |acc, p| acc ^ p).rotate_left(r),
        }
    }
}

pub fn split_int<R: Rng>(value: i64, k: usize, rng: &mut R) -> Split {
    let k = k.max(2);
    let combiner = match rng.gen_range(0..3) {
        0 => Combiner::Add,
        1 => Combiner::Xor,
        _ => Combiner::Rotate(rng.gen_range(1..64)),
    };
    let target = match combiner {
        Combiner::Rotate(r) => value.rotate_right(r),
        _ => value,
    };
    let mut parts: Vec<i64> = (0..k - 1).map(|_| rng.gen()).collect();
    let last = match combiner {
        Combiner::Add => parts.iter().fold(target, |acc, p| acc.wrapping_sub(*p)),
        Combiner::Xor | Combiner::Rotate(_) => parts.iter().fold(target, |acc, p| acc ^ p),
    };
    parts.push(last);
    Split { combiner, parts }
}

fn chain(f: &mut Function, op: BinOp, parts: &[i64]) -> Expr {
    let mut acc = f.int(parts[0]);
    for p in &parts[1..parts.len() - 1] {
        let rhs = f.int(*p);
        acc = f.binary(op, acc, rhs);
    }
    let rhs = f.int(parts[parts.len() - 1]);
    Expr::Binary { op, lhs: acc, rhs }
}

/// Builds the recombination expression. The root is returned unallocated so
/// the caller can write it over the literal's slot.
pub fn emit(f: &mut Function, split: &Split) -> Expr {
    match split.combiner {
        Combiner::Add => chain(f, BinOp::Add, &split.parts),
        Combiner::Xor => chain(f, BinOp::BitXor, &split.parts),
        Combiner::Rotate(r) => {
            let folded = chain(f, BinOp::BitXor, &split.parts);
            let lhs = f.add_expr(folded);
            let rhs = f.int(i64::from(r));
            Expr::Binary {
                op: BinOp::RotL,
                lhs,
                rhs,
            }
        }
    }
}

/// Rewrites the integer literal at `id` in place.
pub fn split_int_at<R: Rng>(f: &mut Function, id: ExprId, value: i64, intensity: f64, rng: &mut R) {
    let split = split_int(value, part_count(intensity), rng);
    let expr = emit(f, &split);
    f.exprs[id.index()] = expr;
}

/// Rewrites the float literal at `id` in place.
pub fn split_float_at<R: Rng>(f: &mut Function, id: ExprId, value: f64, intensity: f64, rng: &mut R) {
    let split = split_int(value.to_bits() as i64, part_count(intensity), rng);
    let bits = emit(f, &split);
    let operand = f.add_expr(bits);
    f.exprs[id.index()] = Expr::Unary {
        op: UnOp::FloatFromBits,
        operand,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_part_count_scales() {
        assert_eq!(part_count(0.0), 2);
        assert_eq!(part_count(0.34), 3);
        assert_eq!(part_count(0.5), 3);
        assert_eq!(part_count(1.0), 5);
    }

    #[test]
    fn test_boundary_values_reconstruct() {
        let mut rng = StdRng::seed_from_u64(42);
        for v in [0, -1, 1, i64::MAX, i64::MIN] {
            for k in 2..=5 {
                for _ in 0..16 {
                    let s = split_int(v, k, &mut rng);
                    assert_eq!(s.parts.len(), k);
                    assert_eq!(s.reconstruct(), v, "{s:?}");
                }
            }
        }
    }

    #[test]
    fn test_all_combiners_appear() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [false; 3];
        for _ in 0..64 {
            match split_int(5, 2, &mut rng).combiner {
                Combiner::Add => seen[0] = true,
                Combiner::Xor => seen[1] = true,
                Combiner::Rotate(_) => seen[2] = true,
            }
        }
        assert_eq!(seen, [true; 3]);
    }
}
