//! HOS Core
//!
//! Shared IR, runtime values, the obfuscation strategy model and string
//! crypto used across the transformer, the VM and the runtime.

pub mod crypto;
pub mod ir;
pub mod strategy;
pub mod value;

pub use ir::{Function, IrError, Module};
pub use strategy::{ConfigurationError, Feature, Strategy};
pub use value::{Exception, ExceptionTag, Value};
