//! Instruction-level obfuscation: substitution, garbage injection, renaming.

pub mod garbage;
pub mod rename;
pub mod substitute;

use tracing::debug;

use hos_core::ir::{Expr, Module};
use hos_core::strategy::{Feature, Strategy};

use crate::context::PassContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InstructionConfig {
    pub substitution: Option<f64>,
    pub garbage: Option<f64>,
    pub renaming: Option<f64>,
}

impl InstructionConfig {
    pub fn from_strategy(strategy: &Strategy) -> Self {
        Self {
            substitution: strategy.active(Feature::InstructionSubstitution),
            garbage: strategy.active(Feature::GarbageInjection),
            renaming: strategy.active(Feature::Renaming),
        }
    }

    pub fn any(&self) -> bool {
        self.substitution.is_some() || self.garbage.is_some() || self.renaming.is_some()
    }
}

pub fn run(module: &mut Module, config: &InstructionConfig, cx: &mut PassContext) -> Result<bool> {
    if !config.any() {
        return Ok(false);
    }
    let mut changed = false;
    for f in &mut module.functions {
        let mut substituted = 0usize;
        if let Some(p) = config.substitution {
            let sites: Vec<_> = f
                .live_exprs()
                .into_iter()
                .filter(|id| matches!(f.expr(*id), Expr::Binary { .. }))
                .collect();
            for id in sites {
                if cx.chance(p) && substitute::substitute_at(f, id, &mut cx.rng) {
                    substituted += 1;
                }
            }
        }
        let injected = match config.garbage {
            Some(p) => garbage::run_function(f, p, &mut cx.rng),
            None => 0,
        };
        let renamed = match config.renaming {
            Some(_) => rename::rename_locals(f, &mut cx.rng).len(),
            None => 0,
        };
        debug!(function = %f.name, substituted, injected, renamed, "instruction pass");
        changed |= substituted + injected + renamed > 0;
    }
    if config.renaming.is_some() {
        let renamed = rename::rename_functions(module, &mut cx.rng);
        changed |= !renamed.is_empty();
        cx.report.renamed_functions.extend(renamed);
    }
    Ok(changed)
}
