//! HOS Runtime
//!
//! Executes (transformed) HOS IR: the runtime a protected program links
//! against. Strings are decrypted at their use site, bytecode blobs run in
//! the embedded VM, and integrity checks are answered by a caller-supplied
//! [`IntegrityHook`].

pub mod error;
pub mod interpreter;

pub use error::RuntimeError;
pub use interpreter::{IntegrityHook, Runtime, TrustingHook, MAX_CALL_DEPTH};

use hos_core::ir::Module;
use hos_core::Value;
use hos_vm::Completion;

/// Everything observable about one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: Completion,
    pub output: Vec<String>,
}

/// Validates `module`, then calls `name` with `args` on a fresh runtime
/// with the trusting hook.
pub fn execute(module: &Module, name: &str, args: Vec<Value>) -> Result<Outcome, RuntimeError> {
    module.validate()?;
    let mut rt = Runtime::new(module);
    let result = rt.call(name, args)?;
    Ok(Outcome {
        result,
        output: rt.take_output(),
    })
}
