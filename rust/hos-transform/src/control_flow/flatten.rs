//! Control-flow flattening.
//!
//! Every reachable block becomes a case of one dispatch `Switch` on a state
//! local. State ids are a shuffled dense range starting at a random base, so
//! neither their values nor their order reveal the original layout. Blocks
//! end by storing the next state and jumping back to the dispatcher; returns
//! store the result and select the exit state. Decoy states get junk bodies
//! and are never selected by any reachable transition.
//!
//! Targets that cannot carry a state store themselves (original `Switch`
//! cases and exception handlers) go through one trampoline per target block.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use hos_core::ir::{Block, BlockId, Expr, ExprId, Function, Literal, LocalId, Stmt, Terminator};

use super::exception_flow::raise_transfer;
use crate::context::PassContext;
use crate::instruction::garbage;

/// Shape of a flattened function, kept for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub state: LocalId,
    pub dispatch: BlockId,
    pub exit_block: BlockId,
    pub exit_state: i64,
    /// Original reachable block → its state id.
    pub states: BTreeMap<BlockId, i64>,
    /// Decoy state id → decoy block.
    pub decoys: BTreeMap<i64, BlockId>,
    /// Whether any original block returned.
    pub returns: bool,
}

/// Decoy states to add for `blocks` original states.
pub fn decoy_count(blocks: usize, intensity: f64) -> usize {
    if intensity <= 0.0 {
        return 0;
    }
    ((blocks as f64 * intensity).ceil() as usize).max(1)
}

struct Wiring<'a> {
    layout: &'a Layout,
    exception_flow: Option<f64>,
    trampolines: BTreeMap<BlockId, BlockId>,
}

impl Wiring<'_> {
    fn store_state(&self, value: ExprId) -> Stmt {
        Stmt::Assign {
            local: self.layout.state,
            value,
        }
    }

    /// Ends `block` with a transfer to the state computed by `next`.
    fn transfer(&self, f: &mut Function, block: BlockId, next: ExprId, cx: &mut PassContext) {
        match self.exception_flow {
            Some(p) if cx.chance(p) => {
                let (dispatch, state) = (self.layout.dispatch, self.layout.state);
                raise_transfer(f, block, next, dispatch, Some(state), cx);
            }
            _ => {
                let store = self.store_state(next);
                let b = f.block_mut(block);
                b.stmts.push(store);
                b.term = Terminator::Jump(self.layout.dispatch);
            }
        }
    }

    fn trampoline(&mut self, f: &mut Function, target: BlockId) -> BlockId {
        if let Some(&t) = self.trampolines.get(&target) {
            return t;
        }
        let id = f.int(self.layout.states[&target]);
        let store = self.store_state(id);
        let t = f.add_block(Block::new(vec![store], Terminator::Jump(self.layout.dispatch)));
        self.trampolines.insert(target, t);
        t
    }
}

/// Flattens `f` in place. `intensity` sets the decoy density;
/// `exception_flow`, when set, is the probability that a transition is
/// routed through a synthetic raise instead of a direct jump.
pub fn flatten(
    f: &mut Function,
    intensity: f64,
    exception_flow: Option<f64>,
    cx: &mut PassContext,
) -> Layout {
    let original = f.reachable_blocks();
    let decoys = decoy_count(original.len(), intensity);
    let total = original.len() + decoys + 1;

    let base: i64 = cx.rng.gen_range(0x100..0x4000_0000);
    let mut ids: Vec<i64> = (base..base + total as i64).collect();
    ids.shuffle(&mut cx.rng);
    let states: BTreeMap<BlockId, i64> = original.iter().copied().zip(ids.iter().copied()).collect();
    let decoy_ids = ids[original.len()..original.len() + decoys].to_vec();
    let exit_state = ids[total - 1];

    let state = f.add_local("state");
    let ret = f.add_local("ret");
    let dispatch = f.add_block(Block::new(Vec::new(), Terminator::Return(None)));
    let ret_value = f.local(ret);
    let exit_block = f.add_block(Block::new(Vec::new(), Terminator::Return(Some(ret_value))));

    let mut layout = Layout {
        state,
        dispatch,
        exit_block,
        exit_state,
        states,
        decoys: BTreeMap::new(),
        returns: false,
    };

    let mut returns = false;
    {
        let mut wiring = Wiring {
            layout: &layout,
            exception_flow,
            trampolines: BTreeMap::new(),
        };
        for &b in &original {
            let mut handlers = std::mem::take(&mut f.block_mut(b).handlers);
            for h in &mut handlers {
                h.target = wiring.trampoline(f, h.target);
            }
            f.block_mut(b).handlers = handlers;

            let term = std::mem::replace(&mut f.block_mut(b).term, Terminator::Return(None));
            let next = match term {
                Terminator::Jump(t) => Some(f.int(wiring.layout.states[&t])),
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let then_value = f.int(wiring.layout.states[&then_block]);
                    let else_value = f.int(wiring.layout.states[&else_block]);
                    Some(f.add_expr(Expr::Select {
                        cond,
                        then_value,
                        else_value,
                    }))
                }
                Terminator::Return(value) => {
                    let value = value.unwrap_or_else(|| f.lit(Literal::Unit));
                    f.block_mut(b).stmts.push(Stmt::Assign { local: ret, value });
                    returns = true;
                    Some(f.int(exit_state))
                }
                Terminator::Switch {
                    scrutinee,
                    cases,
                    default,
                } => {
                    let cases = cases
                        .into_iter()
                        .map(|(key, t)| (key, wiring.trampoline(f, t)))
                        .collect();
                    let default = wiring.trampoline(f, default);
                    f.block_mut(b).term = Terminator::Switch {
                        scrutinee,
                        cases,
                        default,
                    };
                    None
                }
                raise @ Terminator::Raise { .. } => {
                    f.block_mut(b).term = raise;
                    None
                }
            };
            if let Some(next) = next {
                wiring.transfer(f, b, next, cx);
            }
        }
    }
    layout.returns = returns;

    let real: Vec<i64> = layout.states.values().copied().collect();
    for id in decoy_ids {
        let count = cx.rng.gen_range(2..=4);
        let mut stmts = garbage::junk_stmts(f, &mut cx.rng, count);
        let next = f.int(real[cx.rng.gen_range(0..real.len())]);
        stmts.push(Stmt::Assign { local: state, value: next });
        let block = f.add_block(Block::new(stmts, Terminator::Jump(dispatch)));
        layout.decoys.insert(id, block);
    }

    let mut cases: Vec<(i64, BlockId)> = layout
        .states
        .iter()
        .map(|(b, id)| (*id, *b))
        .chain(layout.decoys.iter().map(|(id, b)| (*id, *b)))
        .collect();
    cases.push((exit_state, exit_block));
    cases.sort_unstable_by_key(|(id, _)| *id);
    let default = layout
        .decoys
        .values()
        .copied()
        .collect::<Vec<_>>()
        .choose(&mut cx.rng)
        .copied()
        .unwrap_or(exit_block);
    let scrutinee = f.local(state);
    f.block_mut(dispatch).term = Terminator::Switch {
        scrutinee,
        cases,
        default,
    };

    let entry_state = f.int(layout.states[&f.entry]);
    let init = f.add_block(Block::new(
        vec![Stmt::Assign {
            local: state,
            value: entry_state,
        }],
        Terminator::Jump(dispatch),
    ));
    f.entry = init;
    layout
}
