//! Bytecode virtualization.
//!
//! A selected function is compiled to a private bytecode program, persisted
//! as a module blob, and its body is replaced by a stub that hands its
//! arguments to the embedded VM. The compiler reads the body as it stood
//! before control-flow passes when one was recorded, so a virtualized
//! function replaces its flattened form instead of stacking on top of it.

pub mod compiler;
pub mod slots;

use tracing::debug;

use hos_core::ir::{Block, BytecodeBlob, Expr, Function, FunctionId, Module, Terminator};
use hos_vm::codec;

use crate::context::PassContext;
use crate::error::{Diagnostic, Result, TransformError};

/// Body that forwards every parameter to blob `blob`.
fn stub(original: &Function, blob: u32) -> Function {
    let mut f = Function::new(original.name.clone());
    f.exported = original.exported;
    let args = original
        .params
        .iter()
        .map(|p| {
            let param = f.add_param(original.locals[p.index()].name.clone());
            f.local(param)
        })
        .collect();
    let call = f.add_expr(Expr::VmCall { blob, args });
    f.entry = f.add_block(Block::new(Vec::new(), Terminator::Return(Some(call))));
    f
}

pub fn run(module: &mut Module, intensity: f64, cx: &mut PassContext) -> Result<bool> {
    let mut changed = false;
    for index in 0..module.functions.len() {
        if !cx.chance(intensity) {
            continue;
        }
        let id = FunctionId(index as u32);
        let current = &module.functions[index];
        let name = current.name.clone();
        let source = cx.snapshots.get(&id).unwrap_or(current);

        let program = match compiler::compile(source, &mut cx.rng) {
            Ok(program) => program,
            Err(construct) => {
                cx.diagnose(Diagnostic::UnsupportedConstruct {
                    function: name,
                    construct,
                });
                continue;
            }
        };

        let bytes = codec::encode(&program);
        let survives = codec::decode(&bytes).is_ok_and(|p| codec::encode(&p) == bytes);
        if !survives {
            return Err(TransformError::InvariantViolation {
                pass: "virtualization",
                function: name,
                detail: "bytecode blob does not survive decoding".into(),
            });
        }

        let blob = module.blobs.len() as u32;
        module.blobs.push(BytecodeBlob {
            origin: name.clone(),
            arity: source.params.len() as u32,
            bytes,
        });
        module.functions[index] = stub(&module.functions[index], blob);
        debug!(
            function = %name,
            instructions = program.code.len(),
            constants = program.constants.len(),
            "virtualized"
        );
        cx.report.virtualized.push(name);
        changed = true;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Seed;
    use hos_core::ir::{BinOp, Literal};

    fn module() -> Module {
        let mut f = Function::new("double");
        let x = f.add_param("x");
        let xe = f.local(x);
        let two = f.int(2);
        let product = f.binary(BinOp::Mul, xe, two);
        f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(product))));

        let mut g = Function::new("pair");
        let t = g.lit(Literal::Tuple(vec![Literal::Int(1), Literal::Int(2)]));
        g.entry = g.add_block(Block::new(vec![], Terminator::Return(Some(t))));

        let mut m = Module::new("m");
        m.functions.push(f);
        m.functions.push(g);
        m
    }

    #[test]
    fn test_supported_function_becomes_stub() {
        let mut m = module();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        assert!(run(&mut m, 1.0, &mut cx).unwrap());
        assert!(m.validate().is_ok());

        assert_eq!(m.blobs.len(), 1);
        assert_eq!(m.blobs[0].origin, "double");
        assert_eq!(m.blobs[0].arity, 1);
        let f = &m.functions[0];
        assert!(matches!(
            f.block(f.entry).term,
            Terminator::Return(Some(e)) if matches!(f.expr(e), Expr::VmCall { blob: 0, .. })
        ));

        // The tuple-returning function stays IR and is reported.
        assert_eq!(m.functions[1], module().functions[1]);
        assert_eq!(cx.report.virtualized, vec!["double".to_string()]);
        assert!(matches!(
            &cx.report.diagnostics[..],
            [Diagnostic::UnsupportedConstruct { construct: "tuple literal", .. }]
        ));
    }

    #[test]
    fn test_snapshot_preferred_over_current_body() {
        let mut m = module();
        let mut cx = PassContext::new(Seed::new(0).file_rng("m"), [0; 32], "m");
        // A current body the compiler would reject, with a clean snapshot.
        let mut clean = Function::new("pair");
        let seven = clean.int(7);
        clean.entry = clean.add_block(Block::new(vec![], Terminator::Return(Some(seven))));
        cx.snapshots.insert(FunctionId(1), clean);
        run(&mut m, 1.0, &mut cx).unwrap();
        assert_eq!(m.blobs.len(), 2);
        assert!(cx.report.diagnostics.is_empty());
    }
}
