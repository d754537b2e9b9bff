//! Post-flattening checks.
//!
//! Walks the flattened graph the way execution would: from the entry,
//! following ordinary edges, and through the dispatcher only to the states
//! actually stored into the state local. Every stored state must name an
//! original block or the exit; every original block must be visited once
//! its state is stored; no decoy may be visited.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hos_core::ir::{BlockId, Expr, ExprId, Function, Literal, Stmt, Terminator};

use super::flatten::Layout;

fn constant_states(f: &Function, value: ExprId, out: &mut Vec<i64>) -> Result<(), String> {
    match f.expr(value) {
        Expr::Lit(Literal::Int(v)) => {
            out.push(*v);
            Ok(())
        }
        Expr::Select {
            then_value,
            else_value,
            ..
        } => {
            constant_states(f, *then_value, out)?;
            constant_states(f, *else_value, out)
        }
        other => Err(format!("non-constant state transition {other:?}")),
    }
}

/// States a block can select, through stores or synthetic raises.
fn stored_states(f: &Function, layout: &Layout, b: BlockId) -> Result<Vec<i64>, String> {
    let block = f.block(b);
    let mut out = Vec::new();
    for stmt in &block.stmts {
        if let Stmt::Assign { local, value } = stmt {
            if *local == layout.state {
                constant_states(f, *value, &mut out)?;
            }
        }
    }
    if let Terminator::Raise { tag, payload } = block.term {
        let to_dispatch = block
            .handlers
            .iter()
            .any(|h| h.tag == tag && h.target == layout.dispatch && h.bind == Some(layout.state));
        if to_dispatch {
            constant_states(f, payload, &mut out)?;
        }
    }
    Ok(out)
}

pub fn verify_flattening(f: &Function, layout: &Layout) -> Result<(), String> {
    f.validate().map_err(|e| e.to_string())?;

    let Terminator::Switch {
        scrutinee, cases, ..
    } = &f.block(layout.dispatch).term
    else {
        return Err("dispatch block does not end in a switch".into());
    };
    if *f.expr(*scrutinee) != Expr::Local(layout.state) {
        return Err("dispatch does not switch on the state local".into());
    }
    let mut table: BTreeMap<i64, BlockId> = BTreeMap::new();
    for (key, target) in cases {
        if table.insert(*key, *target).is_some() {
            return Err(format!("state {key} dispatched twice"));
        }
    }
    let mut owners: BTreeMap<BlockId, usize> = BTreeMap::new();
    for target in table.values() {
        *owners.entry(*target).or_default() += 1;
    }
    for (block, id) in &layout.states {
        if table.get(id) != Some(block) {
            return Err(format!("state {id} does not dispatch to {block}"));
        }
        if owners.get(block) != Some(&1) {
            return Err(format!("{block} owns more than one state"));
        }
    }
    if table.get(&layout.exit_state) != Some(&layout.exit_block) {
        return Err("exit state does not dispatch to the exit block".into());
    }

    let live_states: BTreeSet<i64> = layout
        .states
        .values()
        .copied()
        .chain([layout.exit_state])
        .collect();
    let decoy_blocks: BTreeSet<BlockId> = layout.decoys.values().copied().collect();
    let mut seen = BTreeSet::from([f.entry]);
    let mut queue = VecDeque::from([f.entry]);
    while let Some(b) = queue.pop_front() {
        if decoy_blocks.contains(&b) {
            return Err(format!("decoy {b} is reachable"));
        }
        let mut next: Vec<BlockId> = Vec::new();
        for state in stored_states(f, layout, b)? {
            if !live_states.contains(&state) {
                return Err(format!("{b} selects state {state} which is not live"));
            }
            next.push(table[&state]);
        }
        if b != layout.dispatch {
            next.extend(
                f.block(b)
                    .successors()
                    .into_iter()
                    .filter(|s| *s != layout.dispatch),
            );
        }
        for s in next {
            if seen.insert(s) {
                queue.push_back(s);
            }
        }
    }

    if let Some(missing) = layout.states.keys().find(|b| !seen.contains(b)) {
        return Err(format!("original block {missing} became unreachable"));
    }
    if layout.returns && !seen.contains(&layout.exit_block) {
        return Err("exit block is unreachable".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PassContext;
    use crate::control_flow::flatten::flatten;
    use crate::rng::Seed;
    use hos_core::ir::{BinOp, Block};

    fn counting_loop() -> Function {
        let mut f = Function::new("f");
        let n = f.add_param("n");
        let i = f.add_local("i");
        let zero = f.int(0);
        let ie = f.local(i);
        let ne = f.local(n);
        let cond = f.binary(BinOp::Lt, ie, ne);
        let ie = f.local(i);
        let one = f.int(1);
        let inc = f.binary(BinOp::Add, ie, one);
        let ie = f.local(i);

        let exit = f.add_block(Block::new(vec![], Terminator::Return(Some(ie))));
        let header = f.add_block(Block::new(vec![], Terminator::Return(None)));
        let body = f.add_block(Block::new(
            vec![Stmt::Assign { local: i, value: inc }],
            Terminator::Jump(header),
        ));
        f.block_mut(header).term = Terminator::Branch {
            cond,
            then_block: body,
            else_block: exit,
        };
        f.entry = f.add_block(Block::new(
            vec![Stmt::Assign { local: i, value: zero }],
            Terminator::Jump(header),
        ));
        f
    }

    #[test]
    fn test_flattened_loop_verifies() {
        for genome in 0..8 {
            let mut f = counting_loop();
            let mut cx = PassContext::new(Seed::new(genome).file_rng("m"), [0; 32], "m");
            let layout = flatten(&mut f, 0.7, Some(0.5), &mut cx);
            verify_flattening(&f, &layout).unwrap();
        }
    }

    #[test]
    fn test_decoy_selection_is_rejected() {
        let mut f = counting_loop();
        let mut cx = PassContext::new(Seed::new(1).file_rng("m"), [0; 32], "m");
        let layout = flatten(&mut f, 1.0, None, &mut cx);
        let decoy = *layout.decoys.keys().next().unwrap();
        let bad = f.int(decoy);
        let init = f.entry;
        f.block_mut(init).stmts = vec![Stmt::Assign {
            local: layout.state,
            value: bad,
        }];
        let err = verify_flattening(&f, &layout).unwrap_err();
        assert!(err.contains("not live"), "{err}");
    }
}
