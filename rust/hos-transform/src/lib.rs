//! HOS Transform
//!
//! Strategy-driven, semantics-preserving obfuscation of HOS IR: literal
//! encoding and string encryption, runtime guard injection, instruction-level
//! rewriting, function splitting and merging, control-flow flattening, and
//! bytecode virtualization.
//!
//! ```ignore
//! let strategy = Strategy::preset(Mode::Balanced, StrengthLevel::High);
//! let out = hos_transform::transform(module, &strategy, Seed::new(42))?;
//! ```

pub mod context;
pub mod control_flow;
pub mod data;
pub mod error;
pub mod guard;
pub mod instruction;
pub mod pipeline;
pub mod rng;
pub mod structure;
pub mod virtualize;

pub use error::{Diagnostic, TransformError, TransformFailure, TransformReport, Transformed};
pub use pipeline::{transform, transform_batch, Pass};
pub use rng::Seed;
