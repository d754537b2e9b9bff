use thiserror::Error;

use hos_core::crypto::CryptoError;
use hos_core::IrError;
use hos_vm::VmFault;

/// Host-level failures. Program-level exceptions are values
/// ([`hos_core::Exception`]) and never appear here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("vm fault: {0}")]
    Fault(#[from] VmFault),
    #[error("string decryption failed: {0}")]
    Decrypt(#[from] CryptoError),
    #[error("malformed module: {0}")]
    InvalidIr(#[from] IrError),
    #[error("no function named '{0}'")]
    MissingFunction(String),
    #[error("'{function}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("step limit exceeded: {0}")]
    StepLimit(u64),
    #[error("call depth exceeded {0}")]
    DepthLimit(usize),
    #[error("{function}: {detail}")]
    BadReference { function: String, detail: String },
}
