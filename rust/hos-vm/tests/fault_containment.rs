//! Property tests: corrupted blobs and instruction streams fail closed.
//!
//! Whatever bytes reach the decoder or whatever instructions reach the
//! dispatch loop, the VM either completes or returns a `VmFault`. It never
//! panics and never runs past its step budget.

use hos_core::ir::{Builtin, FunctionId};
use hos_core::Value;
use hos_vm::bytecode::{Constant, Instruction, OpCode, Program};
use hos_vm::{codec, Completion, Vm, VmFault, VmHost};
use proptest::prelude::*;

struct NullHost;

impl VmHost for NullHost {
    type Error = VmFault;

    fn call_function(&mut self, _func: FunctionId, _args: Vec<Value>) -> Result<Completion, VmFault> {
        Ok(Ok(Value::Int(0)))
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Completion, VmFault> {
        match builtin {
            Builtin::Print => Ok(Ok(Value::Unit)),
            Builtin::CheckIntegrity => Ok(Ok(Value::Bool(true))),
            _ => Ok(Value::pure_builtin(builtin, &args)),
        }
    }
}

/// `fn(a, b) { if a < b { return b - a } return a - b }`
fn make_distance() -> Program {
    Program::new(
        vec![Constant::Int(0)],
        vec![
            Instruction::op1(OpCode::StoreLocal, 1),
            Instruction::op1(OpCode::StoreLocal, 0),
            Instruction::op1(OpCode::LoadLocal, 0),
            Instruction::op1(OpCode::LoadLocal, 1),
            Instruction::op0(OpCode::Lt),
            Instruction::op1(OpCode::JumpIfFalse, 10),
            Instruction::op1(OpCode::LoadLocal, 1),
            Instruction::op1(OpCode::LoadLocal, 0),
            Instruction::op0(OpCode::Sub),
            Instruction::op0(OpCode::Return),
            Instruction::op1(OpCode::LoadLocal, 0),
            Instruction::op1(OpCode::LoadLocal, 1),
            Instruction::op0(OpCode::Sub),
            Instruction::op0(OpCode::Return),
        ],
    )
}

fn run(program: &Program, args: Vec<Value>) -> Result<Completion, VmFault> {
    Vm::new(program).with_step_limit(10_000).run(args, &mut NullHost)
}

#[test]
fn test_distance_baseline() {
    let p = make_distance();
    assert_eq!(run(&p, vec![Value::Int(3), Value::Int(10)]), Ok(Ok(Value::Int(7))));
    assert_eq!(run(&p, vec![Value::Int(10), Value::Int(3)]), Ok(Ok(Value::Int(7))));
}

#[test]
fn test_missing_operand_faults() {
    let p = Program::new(vec![], vec![Instruction::op0(OpCode::PushConst)]);
    assert_eq!(
        run(&p, vec![]),
        Err(VmFault::MissingOperand {
            ip: 0,
            opcode: OpCode::PushConst
        })
    );
}

#[test]
fn test_bad_constant_index_faults() {
    let p = Program::new(vec![], vec![Instruction::op1(OpCode::PushConst, 4)]);
    assert_eq!(run(&p, vec![]), Err(VmFault::BadConstant { ip: 0, index: 4 }));
}

fn arb_instruction() -> impl Strategy<Value = Instruction> {
    (any::<u8>(), prop::collection::vec(0u32..24, 0..3)).prop_map(|(op, operands)| Instruction { op, operands })
}

proptest! {
    /// Property: arbitrary bytes never panic the decoder.
    #[test]
    fn prop_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode(&bytes);
    }

    /// Property: truncating a valid blob anywhere yields a fault.
    #[test]
    fn prop_truncated_blob_faults(cut_frac in 0.0f64..1.0) {
        let bytes = codec::encode(&make_distance());
        let cut = ((bytes.len() as f64) * cut_frac) as usize;
        prop_assert!(cut < bytes.len());
        prop_assert!(codec::decode(&bytes[..cut]).is_err());
    }

    /// Property: flipping one byte of a valid blob either fails to decode or
    /// runs to a completion or fault within the step budget.
    #[test]
    fn prop_bit_flip_contained(pos_frac in 0.0f64..1.0, mask in 1u8..=255, a in -50i64..50, b in -50i64..50) {
        let mut bytes = codec::encode(&make_distance());
        let pos = ((bytes.len() as f64) * pos_frac) as usize;
        bytes[pos] ^= mask;
        if let Ok(p) = codec::decode(&bytes) {
            let _ = run(&p, vec![Value::Int(a), Value::Int(b)]);
        }
    }

    /// Property: random instruction streams never panic and never exceed the
    /// step budget.
    #[test]
    fn prop_random_program_contained(code in prop::collection::vec(arb_instruction(), 0..40)) {
        let p = Program::new(vec![Constant::Int(1), Constant::Bool(false)], code);
        match run(&p, vec![Value::Int(1)]) {
            Ok(_) => {}
            Err(VmFault::StepLimit(n)) => prop_assert_eq!(n, 10_000),
            Err(_) => {}
        }
    }

    /// Property: a jump to any target past the end faults with that target.
    #[test]
    fn prop_corrupted_ip_faults(target in 14u32..10_000) {
        let mut p = make_distance();
        p.code[5] = Instruction::op1(OpCode::JumpIfFalse, target);
        let res = run(&p, vec![Value::Int(9), Value::Int(1)]);
        prop_assert_eq!(res, Err(VmFault::IpOutOfRange { ip: target as usize, len: 14 }));
    }
}
