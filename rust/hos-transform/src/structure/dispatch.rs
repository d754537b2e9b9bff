//! Call-graph obfuscation.
//!
//! Direct calls are routed through per-arity dispatchers:
//! `dispatch(key, p0, .., pn)` switches on `key ^ mask` and tail-calls the
//! function registered under that key. A call site passes the key of its
//! original callee, so the static call graph shows dispatchers instead of
//! the real edges.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

use hos_core::ir::{BinOp, Block, Callee, Expr, Function, FunctionId, Module, Terminator};

use crate::context::PassContext;
use crate::instruction::rename::NameGen;

/// A call site chosen for rerouting: function index and expression index.
type Site = (usize, usize);

struct Dispatcher {
    id: FunctionId,
    keys: BTreeMap<FunctionId, i64>,
}

fn dispatcher_body(name: String, arity: usize, mask: i64, keys: &BTreeMap<FunctionId, i64>) -> Function {
    let mut f = Function::new(name);
    let key = f.add_param("key");
    let params: Vec<_> = (0..arity).map(|i| f.add_param(format!("p{i}"))).collect();
    let mut cases = Vec::with_capacity(keys.len());
    for (target, k) in keys {
        let args = params.iter().map(|p| f.local(*p)).collect();
        let call = f.add_expr(Expr::Call {
            callee: Callee::Function(*target),
            args,
        });
        let block = f.add_block(Block::new(Vec::new(), Terminator::Return(Some(call))));
        cases.push((k ^ mask, block));
    }
    let ke = f.local(key);
    let m = f.int(mask);
    let scrutinee = f.binary(BinOp::BitXor, ke, m);
    let default = cases[0].1;
    f.entry = f.add_block(Block::new(
        Vec::new(),
        Terminator::Switch {
            scrutinee,
            cases,
            default,
        },
    ));
    f
}

/// Reroutes each direct call whose argument count matches its callee with
/// probability `intensity`. Returns the number of rerouted sites.
pub fn route_calls(module: &mut Module, intensity: f64, names: &mut NameGen, cx: &mut PassContext) -> usize {
    let arity: Vec<usize> = module.functions.iter().map(|f| f.params.len()).collect();
    let mut sites: Vec<(Site, FunctionId)> = Vec::new();
    for (fi, f) in module.functions.iter().enumerate() {
        for (ei, expr) in f.exprs.iter().enumerate() {
            if let Expr::Call {
                callee: Callee::Function(id),
                args,
            } = expr
            {
                if arity.get(id.index()) == Some(&args.len()) && cx.chance(intensity) {
                    sites.push(((fi, ei), *id));
                }
            }
        }
    }
    if sites.is_empty() {
        return 0;
    }

    let mut by_arity: BTreeMap<usize, BTreeSet<FunctionId>> = BTreeMap::new();
    for (_, id) in &sites {
        by_arity.entry(arity[id.index()]).or_default().insert(*id);
    }
    let mut dispatchers: BTreeMap<usize, Dispatcher> = BTreeMap::new();
    for (n, targets) in by_arity {
        let mut used = BTreeSet::new();
        let keys: BTreeMap<FunctionId, i64> = targets
            .into_iter()
            .map(|t| {
                let k = loop {
                    let k: i64 = cx.rng.gen();
                    if used.insert(k) {
                        break k;
                    }
                };
                (t, k)
            })
            .collect();
        let id = FunctionId(module.functions.len() as u32);
        let mask: i64 = cx.rng.gen();
        let name = names.numbered("dispatch", &mut cx.rng);
        module.functions.push(dispatcher_body(name, n, mask, &keys));
        dispatchers.insert(n, Dispatcher { id, keys });
    }

    for ((fi, ei), target) in &sites {
        let d = &dispatchers[&arity[target.index()]];
        let f = &mut module.functions[*fi];
        let Expr::Call { args, .. } = f.exprs[*ei].clone() else {
            continue;
        };
        let key = f.int(d.keys[target]);
        let mut routed = Vec::with_capacity(args.len() + 1);
        routed.push(key);
        routed.extend(args);
        f.exprs[*ei] = Expr::Call {
            callee: Callee::Function(d.id),
            args: routed,
        };
    }
    sites.len()
}
