use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;

use hos_core::ir::{Function, FunctionId};
use hos_core::value::ExceptionTag;

use crate::error::{Diagnostic, TransformReport};

/// Mutable state threaded through every pass of one file.
pub struct PassContext {
    pub rng: StdRng,
    pub master_secret: [u8; 32],
    pub report: TransformReport,
    /// Function bodies as they stood before control-flow passes. Bytecode
    /// virtualization compiles these rather than the flattened form.
    pub snapshots: BTreeMap<FunctionId, Function>,
    next_synthetic: u32,
}

impl PassContext {
    pub fn new(rng: StdRng, master_secret: [u8; 32], file: &str) -> Self {
        Self {
            rng,
            master_secret,
            report: TransformReport {
                file: file.to_string(),
                ..TransformReport::default()
            },
            snapshots: BTreeMap::new(),
            next_synthetic: ExceptionTag::SYNTHETIC_BASE,
        }
    }

    /// Bernoulli draw; `p` is clamped so a validated intensity can be passed directly.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Fresh exception tag, unique within the file and never a built-in tag.
    pub fn synthetic_tag(&mut self) -> ExceptionTag {
        let tag = ExceptionTag(self.next_synthetic);
        self.next_synthetic = self.next_synthetic.wrapping_add(1).max(ExceptionTag::SYNTHETIC_BASE);
        tag
    }

    pub fn diagnose(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(file = %self.report.file, "{diagnostic}");
        self.report.diagnostics.push(diagnostic);
    }
}
