//! Garbage injection: dead stores into fresh locals and short counted loops
//! that do nothing. Injected code is integer arithmetic on literals and on
//! locals it assigned itself, without division, so it can never raise.

use rand::Rng;

use hos_core::ir::{BinOp, Block, BlockId, ExprId, Function, LocalId, Stmt, Terminator};

const JUNK_OPS: [BinOp; 7] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::BitXor,
    BinOp::BitAnd,
    BinOp::BitOr,
    BinOp::RotL,
];

fn fresh_local(f: &mut Function, stem: &str) -> LocalId {
    let name = format!("{stem}{}", f.locals.len());
    f.add_local(name)
}

/// `count` dead assignments to fresh locals. Later statements may read
/// locals assigned by earlier ones in the same sequence.
pub fn junk_stmts<R: Rng>(f: &mut Function, rng: &mut R, count: usize) -> Vec<Stmt> {
    let mut stmts = Vec::with_capacity(count);
    let mut written: Vec<LocalId> = Vec::new();
    for _ in 0..count {
        let lhs: ExprId = match written.last() {
            Some(prev) if rng.gen_bool(0.5) => f.local(*prev),
            _ => f.int(rng.gen_range(-0xffff..=0xffff)),
        };
        let rhs = f.int(rng.gen_range(1..=0xffff));
        let op = JUNK_OPS[rng.gen_range(0..JUNK_OPS.len())];
        let value = f.binary(op, lhs, rhs);
        let local = fresh_local(f, "junk");
        stmts.push(Stmt::Assign { local, value });
        written.push(local);
    }
    stmts
}

/// Splices junk into `block` at a random position.
pub fn inject_junk<R: Rng>(f: &mut Function, block: BlockId, rng: &mut R) {
    let count = rng.gen_range(1..=3);
    let junk = junk_stmts(f, rng, count);
    let stmts = &mut f.block_mut(block).stmts;
    let at = rng.gen_range(0..=stmts.len());
    stmts.splice(at..at, junk);
}

/// Splits `block` at a random statement boundary and runs a loop of 1..=4
/// empty iterations between the halves. Every new block copies the
/// original's handlers so exception routing is unchanged.
pub fn inject_loop<R: Rng>(f: &mut Function, block: BlockId, rng: &mut R) {
    let split_at = rng.gen_range(0..=f.block(block).stmts.len());
    let bound = rng.gen_range(1..=4);
    let handlers = f.block(block).handlers.clone();

    let original = f.block_mut(block);
    let tail_stmts = original.stmts.split_off(split_at);
    let tail_term = std::mem::replace(&mut original.term, Terminator::Return(None));
    let mut tail = Block::new(tail_stmts, tail_term);
    tail.handlers = handlers.clone();
    let tail = f.add_block(tail);

    let counter = fresh_local(f, "iter");
    let zero = f.int(0);
    let bound = f.int(bound);
    let cur = f.local(counter);
    let cond = f.binary(BinOp::Lt, cur, bound);
    let cur = f.local(counter);
    let one = f.int(1);
    let next = f.binary(BinOp::Add, cur, one);

    // Header and body ids are allocated before their contents exist.
    let header = f.add_block(Block::new(Vec::new(), Terminator::Return(None)));
    let mut body = Block::new(
        vec![Stmt::Assign {
            local: counter,
            value: next,
        }],
        Terminator::Jump(header),
    );
    body.handlers = handlers.clone();
    let body = f.add_block(body);

    let h = f.block_mut(header);
    h.term = Terminator::Branch {
        cond,
        then_block: body,
        else_block: tail,
    };
    h.handlers = handlers;

    let head = f.block_mut(block);
    head.stmts.push(Stmt::Assign {
        local: counter,
        value: zero,
    });
    head.term = Terminator::Jump(header);
}

/// Injects garbage into reachable blocks with probability `intensity` each;
/// a quarter of the injections are loops.
pub fn run_function<R: Rng>(f: &mut Function, intensity: f64, rng: &mut R) -> usize {
    let mut injected = 0;
    for b in f.reachable_blocks() {
        if !rng.gen_bool(intensity) {
            continue;
        }
        if rng.gen_bool(0.25) {
            inject_loop(f, b, rng);
        } else {
            inject_junk(f, b, rng);
        }
        injected += 1;
    }
    injected
}
