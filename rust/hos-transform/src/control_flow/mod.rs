//! Control-flow obfuscation: loop state flags, flattening into a dispatch
//! state machine, exception-driven transfers, and opaque-predicate branches.

pub mod exception_flow;
pub mod fake_branches;
pub mod flatten;
pub mod loops;
pub mod verify;

use tracing::debug;

use hos_core::ir::Module;
use hos_core::strategy::{Feature, Strategy};

use crate::context::PassContext;
use crate::error::{Result, TransformError};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlFlowConfig {
    pub flattening: Option<f64>,
    pub fake_branches: Option<f64>,
    pub exception_flow: Option<f64>,
    pub loop_transform: Option<f64>,
}

impl ControlFlowConfig {
    pub fn from_strategy(strategy: &Strategy) -> Self {
        Self {
            flattening: strategy.active(Feature::Flattening),
            fake_branches: strategy.active(Feature::FakeBranches),
            exception_flow: strategy.active(Feature::ExceptionFlow),
            loop_transform: strategy.active(Feature::LoopTransform),
        }
    }

    pub fn any(&self) -> bool {
        self.flattening.is_some()
            || self.fake_branches.is_some()
            || self.exception_flow.is_some()
            || self.loop_transform.is_some()
    }
}

pub fn run(module: &mut Module, config: &ControlFlowConfig, cx: &mut PassContext) -> Result<bool> {
    if !config.any() {
        return Ok(false);
    }
    let mut changed = false;
    for f in &mut module.functions {
        if let Some(p) = config.loop_transform {
            let loops = loops::run_function(f, p, cx);
            debug!(function = %f.name, loops, "loop transform");
            changed |= loops > 0;
        }
        if let Some(intensity) = config.flattening {
            let layout = flatten::flatten(f, intensity, config.exception_flow, cx);
            verify::verify_flattening(f, &layout).map_err(|detail| {
                TransformError::InvariantViolation {
                    pass: "flattening",
                    function: f.name.clone(),
                    detail,
                }
            })?;
            debug!(
                function = %f.name,
                states = layout.states.len(),
                decoys = layout.decoys.len(),
                "flattened"
            );
            cx.report.flattened.push(f.name.clone());
            changed = true;
        } else if let Some(p) = config.exception_flow {
            let rerouted = exception_flow::reroute_jumps(f, p, cx);
            debug!(function = %f.name, rerouted, "exception flow");
            changed |= rerouted > 0;
        }
        if let Some(p) = config.fake_branches {
            let inserted = fake_branches::run_function(f, p, cx);
            debug!(function = %f.name, inserted, "fake branches");
            changed |= inserted > 0;
        }
    }
    Ok(changed)
}
