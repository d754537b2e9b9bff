use hos_core::crypto::{derive_master_secret, seal};
use hos_core::ir::{
    BinOp, Block, BytecodeBlob, Builtin, Callee, Expr, Function, Module, Stmt, Terminator,
};
use hos_core::{Exception, ExceptionTag, Value};
use hos_rt::{execute, Runtime, RuntimeError};
use hos_vm::bytecode::{Constant, Instruction, OpCode, Program};
use hos_vm::codec;

const GENOME: u64 = 9;

fn ins(op: OpCode, operands: &[u32]) -> Instruction {
    Instruction::new(op, operands.to_vec())
}

/// `inc(x) = x + 1`, called back from bytecode.
fn inc() -> Function {
    let mut f = Function::new("inc");
    let x = f.add_param("x");
    let xe = f.local(x);
    let one = f.int(1);
    let r = f.binary(BinOp::Add, xe, one);
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(r))));
    f
}

/// Prints and returns encrypted string 0.
fn shout() -> Function {
    let mut f = Function::new("shout");
    f.exported = true;
    let s = f.add_expr(Expr::Decrypt { record: 0 });
    let printed = f.add_expr(Expr::Call {
        callee: Callee::Builtin(Builtin::Print),
        args: vec![s],
    });
    let again = f.add_expr(Expr::Decrypt { record: 0 });
    f.entry = f.add_block(Block::new(vec![Stmt::Eval(printed)], Terminator::Return(Some(again))));
    f
}

/// Stub forwarding its parameters to `blob`.
fn stub(name: &str, arity: usize, blob: u32) -> Function {
    let mut f = Function::new(name);
    f.exported = true;
    let args = (0..arity)
        .map(|i| {
            let p = f.add_param(format!("p{i}"));
            f.local(p)
        })
        .collect();
    let call = f.add_expr(Expr::VmCall { blob, args });
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(call))));
    f
}

/// `(a, b) -> a * b + inc(a)`
fn product_program() -> Program {
    Program::new(
        vec![],
        vec![
            ins(OpCode::StoreLocal, &[1]),
            ins(OpCode::StoreLocal, &[0]),
            ins(OpCode::LoadLocal, &[0]),
            ins(OpCode::LoadLocal, &[1]),
            ins(OpCode::Mul, &[]),
            ins(OpCode::LoadLocal, &[0]),
            ins(OpCode::Call, &[0, 1]),
            ins(OpCode::Add, &[]),
            ins(OpCode::Return, &[]),
        ],
    )
}

/// Raises tag 77 with payload 5.
fn raising_program() -> Program {
    Program::new(
        vec![Constant::Int(5)],
        vec![ins(OpCode::PushConst, &[0]), ins(OpCode::Raise, &[77])],
    )
}

fn module() -> Module {
    let mut m = Module::new("rt.hos");
    let key = derive_master_secret(GENOME, &m.name);
    m.strings
        .push(seal(&key, [3; 16], [4; 16], "attack at dawn").unwrap());
    m.string_key = Some(key);
    m.blobs.push(BytecodeBlob {
        origin: "product".into(),
        arity: 2,
        bytes: codec::encode(&product_program()),
    });
    m.blobs.push(BytecodeBlob {
        origin: "doomed".into(),
        arity: 0,
        bytes: codec::encode(&raising_program()),
    });
    m.functions = vec![inc(), shout(), stub("product", 2, 0), stub("doomed", 0, 1)];
    m
}

#[test]
fn test_encrypted_strings_decrypt_at_use() {
    let out = execute(&module(), "shout", vec![]).unwrap();
    assert_eq!(out.result, Ok(Value::Str("attack at dawn".into())));
    assert_eq!(out.output, ["attack at dawn"]);
}

#[test]
fn test_tampered_ciphertext_is_rejected() {
    let mut m = module();
    m.strings[0].ciphertext[0] ^= 1;
    let err = execute(&m, "shout", vec![]).unwrap_err();
    assert!(matches!(err, RuntimeError::Decrypt(_)), "{err}");
}

#[test]
fn test_wrong_key_is_rejected() {
    let mut m = module();
    m.string_key = Some(derive_master_secret(GENOME + 1, "rt.hos"));
    assert!(matches!(
        execute(&m, "shout", vec![]),
        Err(RuntimeError::Decrypt(_))
    ));
}

#[test]
fn test_bytecode_calls_back_into_ir() {
    let out = execute(&module(), "product", vec![Value::Int(3), Value::Int(4)]).unwrap();
    assert_eq!(out.result, Ok(Value::Int(16)));
}

#[test]
fn test_bytecode_raise_surfaces_as_exception() {
    let out = execute(&module(), "doomed", vec![]).unwrap();
    assert_eq!(out.result, Err(Exception::new(ExceptionTag(77), Value::Int(5))));
}

#[test]
fn test_decoded_programs_are_reused() {
    let m = module();
    let mut rt = Runtime::new(&m);
    for a in 0..5 {
        let r = rt.call("product", vec![Value::Int(a), Value::Int(2)]).unwrap();
        assert_eq!(r, Ok(Value::Int(a * 2 + a + 1)));
    }
}

#[test]
fn test_corrupt_blob_is_a_fault() {
    let mut m = module();
    m.blobs[0].bytes.truncate(3);
    let err = execute(&m, "product", vec![Value::Int(1), Value::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::Fault(_)), "{err}");
}

#[test]
fn test_unknown_function() {
    assert_eq!(
        execute(&module(), "nope", vec![]),
        Err(RuntimeError::MissingFunction("nope".into()))
    );
}

#[test]
fn test_self_referencing_expression_is_rejected() {
    let mut f = Function::new("spin");
    let one = f.int(1);
    let sum = f.add_expr(Expr::Binary {
        op: BinOp::Add,
        lhs: hos_core::ir::ExprId(1),
        rhs: one,
    });
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(sum))));
    let mut m = Module::new("spin.hos");
    m.functions.push(f);
    let err = execute(&m, "spin", vec![]).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidIr(hos_core::IrError::CyclicExpr { .. })), "{err}");
}

#[test]
fn test_long_loop_runs_without_a_step_cap() {
    // while i < n { i = i + 1 } return i, for more iterations than any fixed cap would allow
    let mut f = Function::new("count");
    let n = f.add_param("n");
    let i = f.add_local("i");
    let zero = f.int(0);
    let ie = f.local(i);
    let ne = f.local(n);
    let cond = f.binary(BinOp::Lt, ie, ne);
    let ie = f.local(i);
    let one = f.int(1);
    let next = f.binary(BinOp::Add, ie, one);
    let result = f.local(i);
    let exit = f.add_block(Block::new(vec![], Terminator::Return(Some(result))));
    let header = f.add_block(Block::new(vec![], Terminator::Return(None)));
    let body = f.add_block(Block::new(
        vec![Stmt::Assign { local: i, value: next }],
        Terminator::Jump(header),
    ));
    f.blocks[header.index()].term = Terminator::Branch {
        cond,
        then_block: body,
        else_block: exit,
    };
    f.entry = f.add_block(Block::new(vec![Stmt::Assign { local: i, value: zero }], Terminator::Jump(header)));
    let mut m = Module::new("count.hos");
    m.functions.push(f);
    let out = execute(&m, "count", vec![Value::Int(6_000_000)]).unwrap();
    assert_eq!(out.result, Ok(Value::Int(6_000_000)));

    let err = Runtime::new(&m).with_step_limit(1_000).call("count", vec![Value::Int(6_000_000)]).unwrap_err();
    assert_eq!(err, RuntimeError::StepLimit(1_000));
}
