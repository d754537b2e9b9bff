//! Pass orchestration.
//!
//! Passes run in a fixed order, each gated by the strategy:
//! data → runtime guard → instruction → structure → control flow →
//! virtualization.
//! After every pass the module is revalidated; a pass that leaves a dangling
//! reference or cuts a function off from all of its exits aborts the file,
//! and the caller gets the untouched input back.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use hos_core::ir::{FunctionId, Module};
use hos_core::strategy::{Feature, Strategy};

use crate::context::PassContext;
use crate::control_flow::{self, ControlFlowConfig};
use crate::data::{self, DataConfig};
use crate::error::{Result, TransformError, TransformFailure, Transformed};
use crate::guard;
use crate::instruction::{self, InstructionConfig};
use crate::rng::Seed;
use crate::structure::{self, StructureConfig};
use crate::virtualize;

/// One scheduled pass with its resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pass {
    Data(DataConfig),
    Guard { intensity: f64 },
    Instruction(InstructionConfig),
    Structure(StructureConfig),
    /// Records function bodies for the virtualizer before control flow is rewritten.
    Snapshot,
    ControlFlow(ControlFlowConfig),
    Virtualization { intensity: f64 },
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Pass::Data(_) => "data",
            Pass::Guard { .. } => "runtime_guard",
            Pass::Instruction(_) => "instruction",
            Pass::Structure(_) => "structure",
            Pass::Snapshot => "snapshot",
            Pass::ControlFlow(_) => "control_flow",
            Pass::Virtualization { .. } => "virtualization",
        }
    }

    /// The passes `strategy` enables, in execution order.
    pub fn plan(strategy: &Strategy) -> Vec<Pass> {
        let mut passes = Vec::new();
        let data = DataConfig::from_strategy(strategy);
        if data.any() {
            passes.push(Pass::Data(data));
        }
        if let Some(intensity) = strategy.active(Feature::IntegrityChecks) {
            passes.push(Pass::Guard { intensity });
        }
        let instruction = InstructionConfig::from_strategy(strategy);
        if instruction.any() {
            passes.push(Pass::Instruction(instruction));
        }
        let structure = StructureConfig::from_strategy(strategy);
        if structure.any() {
            passes.push(Pass::Structure(structure));
        }
        let control_flow = ControlFlowConfig::from_strategy(strategy);
        let bytecode = strategy.active(Feature::BytecodeVm);
        if control_flow.any() {
            if bytecode.is_some() {
                passes.push(Pass::Snapshot);
            }
            passes.push(Pass::ControlFlow(control_flow));
        }
        if let Some(intensity) = bytecode {
            passes.push(Pass::Virtualization { intensity });
        }
        passes
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext) -> Result<bool> {
        match self {
            Pass::Data(config) => data::run(module, config, cx),
            Pass::Guard { intensity } => guard::run(module, *intensity, cx),
            Pass::Instruction(config) => instruction::run(module, config, cx),
            Pass::Structure(config) => structure::run(module, config, cx),
            Pass::Snapshot => {
                cx.snapshots = module
                    .functions
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (FunctionId(i as u32), f.clone()))
                    .collect();
                Ok(false)
            }
            Pass::ControlFlow(config) => control_flow::run(module, config, cx),
            Pass::Virtualization { intensity } => virtualize::run(module, *intensity, cx),
        }
    }
}

/// Structural checks run after every pass. `had_exit[i]` records whether
/// function `i` of the input could reach a return or raise.
fn check(pass: &'static str, module: &Module, had_exit: &[bool]) -> Result<()> {
    module.validate().map_err(|e| TransformError::InvariantViolation {
        pass,
        function: e.function().unwrap_or(&module.name).to_string(),
        detail: e.to_string(),
    })?;
    for (f, had) in module.functions.iter().zip(had_exit) {
        if *had && !f.has_reachable_exit() {
            return Err(TransformError::InvariantViolation {
                pass,
                function: f.name.clone(),
                detail: "no exit is reachable from the entry".into(),
            });
        }
    }
    Ok(())
}

fn run_passes(module: &Module, strategy: &Strategy, seed: Seed, cx: &mut PassContext) -> Result<Module> {
    module.validate()?;
    let had_exit: Vec<bool> = module.functions.iter().map(|f| f.has_reachable_exit()).collect();
    let mut work = module.clone();
    for pass in Pass::plan(strategy) {
        let changed = pass.apply(&mut work, cx)?;
        check(pass.name(), &work, &had_exit)?;
        debug!(file = %module.name, genome = seed.genome, pass = pass.name(), changed, "pass complete");
        cx.report.passes.push(pass.name());
    }
    Ok(work)
}

/// Transforms one file. The module name is the file id that, with the seed,
/// determines every random choice. On failure the input comes back untouched
/// alongside the error and any diagnostics collected before it.
pub fn transform(
    module: Module,
    strategy: &Strategy,
    seed: Seed,
) -> std::result::Result<Transformed, TransformFailure> {
    let file = module.name.clone();
    let mut cx = PassContext::new(seed.file_rng(&file), seed.master_secret(&file), &file);
    match run_passes(&module, strategy, seed, &mut cx) {
        Ok(transformed) => {
            info!(
                file = %file,
                passes = cx.report.passes.len(),
                diagnostics = cx.report.diagnostics.len(),
                flattened = cx.report.flattened.len(),
                virtualized = cx.report.virtualized.len(),
                "file protected"
            );
            Ok(Transformed {
                module: transformed,
                report: cx.report,
            })
        }
        Err(error) => {
            warn!(file = %file, %error, "transformation aborted, original kept");
            Err(TransformFailure {
                original: module,
                error,
                diagnostics: cx.report.diagnostics,
            })
        }
    }
}

/// Transforms independent files in parallel. Results are in input order.
pub fn transform_batch(
    files: Vec<Module>,
    strategy: &Strategy,
    seed: Seed,
) -> Vec<std::result::Result<Transformed, TransformFailure>> {
    files
        .into_par_iter()
        .map(|module| transform(module, strategy, seed))
        .collect()
}
