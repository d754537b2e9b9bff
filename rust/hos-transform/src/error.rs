use serde::Serialize;
use std::fmt;
use thiserror::Error;

use hos_core::crypto::CryptoError;
use hos_core::ir::{ExprId, IrError, Module};
use hos_core::strategy::ConfigurationError;

/// Fatal conditions. Any of these aborts the whole file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("input IR is malformed: {0}")]
    InvalidIr(#[from] IrError),
    #[error("{pass}: invariant violated in '{function}': {detail}")]
    InvariantViolation {
        pass: &'static str,
        function: String,
        detail: String,
    },
    #[error("string encryption failed: {0}")]
    Encryption(#[from] CryptoError),
}

/// Non-fatal conditions. The offending node is skipped and the pass continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UnsupportedLiteral {
        function: String,
        expr: ExprId,
        literal: &'static str,
    },
    UnsupportedConstruct {
        function: String,
        construct: &'static str,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnsupportedLiteral {
                function,
                expr,
                literal,
            } => write!(f, "{function}: {literal} literal at {expr} left untransformed"),
            Diagnostic::UnsupportedConstruct {
                function,
                construct,
            } => write!(f, "{function}: {construct} cannot be virtualized"),
        }
    }
}

/// Per-file summary of what the pipeline did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    pub file: String,
    /// Passes that ran, in order.
    pub passes: Vec<&'static str>,
    pub diagnostics: Vec<Diagnostic>,
    /// Old function name → new name, for non-exported functions.
    pub renamed_functions: Vec<(String, String)>,
    /// Functions whose tail moved into a new function.
    pub split: Vec<String>,
    /// Functions folded into a merged body behind a selector.
    pub merged: Vec<String>,
    /// Call sites routed through a dispatcher.
    pub dispatched: usize,
    pub flattened: Vec<String>,
    pub virtualized: Vec<String>,
}

/// A successfully transformed file.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub module: Module,
    pub report: TransformReport,
}

/// A file whose transformation aborted. `original` is the input, untouched.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {error}", .original.name)]
pub struct TransformFailure {
    pub original: Module,
    pub error: TransformError,
    pub diagnostics: Vec<Diagnostic>,
}

pub type Result<T> = std::result::Result<T, TransformError>;
