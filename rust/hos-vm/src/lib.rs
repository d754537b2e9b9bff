//! HOS VM: private bytecode format and the stack interpreter that runs
//! virtualized function bodies at runtime.

pub mod bytecode;
pub mod codec;
pub mod vm;

pub use bytecode::{Constant, ConstantPool, Instruction, OpCode, Program};
pub use vm::{execute, execute_blob, Completion, Vm, VmFault, VmHost};
