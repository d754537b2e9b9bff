//! Structure-level obfuscation: function splitting, function merging and
//! call-graph rerouting. Exported functions keep their name, signature and
//! id; everything else about the module's function layout may change.

pub mod dispatch;
pub mod merge;
pub mod split;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use hos_core::ir::{FunctionId, Module};
use hos_core::strategy::{Feature, Strategy};

use crate::context::PassContext;
use crate::error::Result;
use crate::instruction::rename::NameGen;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StructureConfig {
    pub splitting: Option<f64>,
    pub merging: Option<f64>,
    pub call_graph: Option<f64>,
}

impl StructureConfig {
    pub fn from_strategy(strategy: &Strategy) -> Self {
        Self {
            splitting: strategy.active(Feature::FunctionSplitting),
            merging: strategy.active(Feature::FunctionMerging),
            call_graph: strategy.active(Feature::CallGraphObfuscation),
        }
    }

    pub fn any(&self) -> bool {
        self.splitting.is_some() || self.merging.is_some() || self.call_graph.is_some()
    }
}

pub fn run(module: &mut Module, config: &StructureConfig, cx: &mut PassContext) -> Result<bool> {
    if !config.any() {
        return Ok(false);
    }
    let mut names = NameGen::reserving(module.functions.iter().map(|f| f.name.clone()));
    let mut changed = false;

    if let Some(p) = config.splitting {
        for index in 0..module.functions.len() {
            if !cx.chance(p) {
                continue;
            }
            if let Some(part) = split::split_function(module, index, &mut names, &mut cx.rng) {
                let name = module.functions[index].name.clone();
                debug!(function = %name, %part, "split");
                cx.report.split.push(name);
                changed = true;
            }
        }
    }

    if let Some(p) = config.merging {
        let mut candidates: Vec<FunctionId> = module
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.exported)
            .map(|(i, _)| FunctionId(i as u32))
            .collect();
        candidates.shuffle(&mut cx.rng);
        let mut rest = candidates.as_slice();
        while rest.len() >= 2 {
            let take = cx.rng.gen_range(2..=3).min(rest.len());
            let (group, tail) = rest.split_at(take);
            rest = tail;
            if !cx.chance(p) {
                continue;
            }
            let mut group = group.to_vec();
            group.sort();
            let names_before: Vec<String> = group
                .iter()
                .map(|id| module.functions[id.index()].name.clone())
                .collect();
            let members = merge::merge_functions(module, &group, &mut names, &mut cx.rng);
            debug!(functions = ?names_before, members = members.len(), "merged");
            cx.report.merged.extend(names_before);
            changed = true;
        }
    }

    if let Some(p) = config.call_graph {
        let routed = dispatch::route_calls(module, p, &mut names, cx);
        debug!(routed, "call graph");
        cx.report.dispatched += routed;
        changed |= routed > 0;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Seed;
    use hos_core::ir::{BinOp, Block, Callee, Expr, Function, Stmt, Terminator};
    use hos_core::Value;

    /// Two helpers and an exported caller with a branch to split at.
    fn module() -> Module {
        let mut twice = Function::new("twice");
        let x = twice.add_param("x");
        let xe = twice.local(x);
        let two = twice.int(2);
        let product = twice.binary(BinOp::Mul, xe, two);
        twice.entry = twice.add_block(Block::new(vec![], Terminator::Return(Some(product))));

        let mut offset = Function::new("offset");
        let a = offset.add_param("a");
        let b = offset.add_param("b");
        let ae = offset.local(a);
        let be = offset.local(b);
        let diff = offset.binary(BinOp::Sub, ae, be);
        offset.entry = offset.add_block(Block::new(vec![], Terminator::Return(Some(diff))));

        let mut main = Function::new("main");
        main.exported = true;
        let x = main.add_param("x");
        let y = main.add_local("y");
        let xe = main.local(x);
        let t = main.add_expr(Expr::Call {
            callee: Callee::Function(FunctionId(0)),
            args: vec![xe],
        });
        let ye = main.local(y);
        let zero = main.int(0);
        let cond = main.binary(BinOp::Lt, ye, zero);
        let ye = main.local(y);
        let xe = main.local(x);
        let o = main.add_expr(Expr::Call {
            callee: Callee::Function(FunctionId(1)),
            args: vec![ye, xe],
        });
        let ye = main.local(y);
        let low = main.add_block(Block::new(vec![], Terminator::Return(Some(o))));
        let high = main.add_block(Block::new(vec![], Terminator::Return(Some(ye))));
        main.entry = main.add_block(Block::new(
            vec![Stmt::Assign { local: y, value: t }],
            Terminator::Branch {
                cond,
                then_block: low,
                else_block: high,
            },
        ));

        let mut m = Module::new("structure.hos");
        m.functions = vec![twice, offset, main];
        m
    }

    #[test]
    fn test_all_structure_features_preserve_behaviour() {
        let original = module();
        let config = StructureConfig {
            splitting: Some(1.0),
            merging: Some(1.0),
            call_graph: Some(1.0),
        };
        for genome in 0..6 {
            let mut m = original.clone();
            let mut cx = PassContext::new(Seed::new(genome).file_rng("structure.hos"), [0; 32], "structure.hos");
            assert!(run(&mut m, &config, &mut cx).unwrap());
            assert!(m.validate().is_ok());
            assert!(m.functions.len() > original.functions.len());
            assert_eq!(m.functions[2].name, "main");
            assert!(m.functions[2].exported);
            assert!(!cx.report.merged.is_empty());
            assert!(cx.report.dispatched > 0);
            for x in [-3, 0, 4] {
                assert_eq!(
                    hos_rt::execute(&original, "main", vec![Value::Int(x)]).unwrap(),
                    hos_rt::execute(&m, "main", vec![Value::Int(x)]).unwrap(),
                    "genome {genome}, x = {x}"
                );
            }
        }
    }

    #[test]
    fn test_disabled_config_is_noop() {
        let mut m = module();
        let before = m.clone();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        assert!(!run(&mut m, &StructureConfig::default(), &mut cx).unwrap());
        assert_eq!(m, before);
    }
}
