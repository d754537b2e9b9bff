//! Function merging.
//!
//! Several non-exported functions become one body behind a selector
//! parameter: `merged(sel, a0, .., ak)` switches on `sel` into a prologue
//! that copies the shared arguments into the chosen function's parameters
//! and jumps to its entry. Call sites with the right argument count are
//! rewritten to call the merged function directly. Each original slot keeps
//! a forwarding stub so function ids, names and arity errors stay as they were.

use rand::Rng;
use std::collections::BTreeSet;

use hos_core::ir::{
    Block, BlockId, Callee, Expr, ExprId, Function, FunctionId, Literal, LocalId, Module, Stmt,
    Terminator,
};

use crate::instruction::rename::NameGen;

/// One function folded into the merged body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: FunctionId,
    pub key: i64,
    pub arity: usize,
}

/// Appends `src`'s arenas to `dst`, shifting every id. Returns the entry
/// block of the copy and the offset of its locals.
fn append_body(dst: &mut Function, src: &Function) -> (BlockId, u32) {
    let locals = dst.locals.len() as u32;
    let exprs = dst.exprs.len() as u32;
    let blocks = dst.blocks.len() as u32;
    let cells = dst.lazy_cells();

    dst.locals.extend(src.locals.iter().cloned());
    for expr in &src.exprs {
        let mut e = expr.clone();
        for child in e.children_mut() {
            child.0 += exprs;
        }
        match &mut e {
            Expr::Local(l) => l.0 += locals,
            Expr::Lazy { cell, .. } => *cell += cells,
            _ => {}
        }
        dst.exprs.push(e);
    }
    for block in &src.blocks {
        let mut b = block.clone();
        for root in b.roots_mut() {
            root.0 += exprs;
        }
        for target in b.successors_mut() {
            target.0 += blocks;
        }
        for stmt in &mut b.stmts {
            if let Stmt::Assign { local, .. } = stmt {
                local.0 += locals;
            }
        }
        for handler in &mut b.handlers {
            if let Some(bind) = &mut handler.bind {
                bind.0 += locals;
            }
        }
        dst.blocks.push(b);
    }
    (BlockId(src.entry.0 + blocks), locals)
}

/// Builds the merged function for `members` of `module`.
fn merged_body(module: &Module, members: &[Member], name: String) -> Function {
    let mut merged = Function::new(name);
    let sel = merged.add_param("sel");
    let width = members.iter().map(|m| m.arity).max().unwrap_or(0);
    let shared: Vec<LocalId> = (0..width).map(|i| merged.add_param(format!("a{i}"))).collect();

    let mut cases = Vec::with_capacity(members.len());
    for member in members {
        let src = &module.functions[member.id.index()];
        let (entry, offset) = append_body(&mut merged, src);
        let stmts = src
            .params
            .iter()
            .zip(&shared)
            .map(|(param, arg)| Stmt::Assign {
                local: LocalId(param.0 + offset),
                value: merged.local(*arg),
            })
            .collect();
        let prologue = merged.add_block(Block::new(stmts, Terminator::Jump(entry)));
        cases.push((member.key, prologue));
    }
    let scrutinee = merged.local(sel);
    let default = cases[0].1;
    merged.entry = merged.add_block(Block::new(
        Vec::new(),
        Terminator::Switch {
            scrutinee,
            cases,
            default,
        },
    ));
    merged
}

/// Selector plus arguments padded with unit to the merged width.
fn merged_args(f: &mut Function, key: i64, args: Vec<ExprId>, width: usize) -> Vec<ExprId> {
    let mut out = Vec::with_capacity(width + 1);
    out.push(f.int(key));
    let pad = width - args.len();
    out.extend(args);
    for _ in 0..pad {
        out.push(f.lit(Literal::Unit));
    }
    out
}

/// `return merged(key, p0, .., pn, (), ..)` under the original signature.
fn forwarder(original: &Function, target: FunctionId, key: i64, width: usize) -> Function {
    let mut f = Function::new(original.name.clone());
    let args = original
        .params
        .iter()
        .map(|p| {
            let param = f.add_param(original.locals[p.index()].name.clone());
            f.local(param)
        })
        .collect();
    let args = merged_args(&mut f, key, args, width);
    let call = f.add_expr(Expr::Call {
        callee: Callee::Function(target),
        args,
    });
    f.entry = f.add_block(Block::new(Vec::new(), Terminator::Return(Some(call))));
    f
}

/// Folds `ids` (non-exported) into one new function appended to the module.
/// Returns the members with their selector keys, or nothing for fewer than two.
pub fn merge_functions<R: Rng>(
    module: &mut Module,
    ids: &[FunctionId],
    names: &mut NameGen,
    rng: &mut R,
) -> Vec<Member> {
    if ids.len() < 2 {
        return Vec::new();
    }
    let mut keys = BTreeSet::new();
    let members: Vec<Member> = ids
        .iter()
        .map(|id| {
            let key = loop {
                let k = rng.gen_range(-0x7fff..=0x7fff);
                if keys.insert(k) {
                    break k;
                }
            };
            Member {
                id: *id,
                key,
                arity: module.functions[id.index()].params.len(),
            }
        })
        .collect();
    let width = members.iter().map(|m| m.arity).max().unwrap_or(0);
    let target = FunctionId(module.functions.len() as u32);
    let merged = merged_body(module, &members, names.numbered("merged", rng));
    module.functions.push(merged);

    for f in &mut module.functions {
        for index in 0..f.exprs.len() {
            let Expr::Call {
                callee: Callee::Function(id),
                args,
            } = &f.exprs[index]
            else {
                continue;
            };
            let Some(member) = members.iter().find(|m| m.id == *id && m.arity == args.len()) else {
                continue;
            };
            let (key, args) = (member.key, args.clone());
            let args = merged_args(f, key, args, width);
            f.exprs[index] = Expr::Call {
                callee: Callee::Function(target),
                args,
            };
        }
    }
    for member in &members {
        let slot = &mut module.functions[member.id.index()];
        *slot = forwarder(slot, target, member.key, width);
    }
    members
}
