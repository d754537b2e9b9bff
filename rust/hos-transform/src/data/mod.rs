//! Data obfuscation: literal rewriting and string encryption.
//!
//! Each numeric literal receives at most one numeric transform, decided in
//! fixed precedence order: encoding table (probability = its intensity),
//! then dynamic calculation (probability = its intensity), then constant
//! splitting (always, when enabled). String literals go only to string
//! encryption. Literals created here are never revisited because the set of
//! sites is collected before any rewriting starts.

pub mod dynamic;
pub mod split;
pub mod strings;
pub mod table;

use tracing::debug;

use hos_core::ir::{Expr, Literal, Module};
use hos_core::strategy::{Feature, Strategy};

use crate::context::PassContext;
use crate::error::{Diagnostic, Result};
use table::TableBuilder;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DataConfig {
    pub constant_splitting: Option<f64>,
    pub dynamic_calculation: Option<f64>,
    pub encoding_table: Option<f64>,
    pub string_encryption: Option<f64>,
}

impl DataConfig {
    pub fn from_strategy(strategy: &Strategy) -> Self {
        Self {
            constant_splitting: strategy.active(Feature::ConstantSplitting),
            dynamic_calculation: strategy.active(Feature::DynamicCalculation),
            encoding_table: strategy.active(Feature::EncodingTable),
            string_encryption: strategy.active(Feature::StringEncryption),
        }
    }

    pub fn any(&self) -> bool {
        self.numeric() || self.string_encryption.is_some()
    }

    fn numeric(&self) -> bool {
        self.constant_splitting.is_some()
            || self.dynamic_calculation.is_some()
            || self.encoding_table.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Default)]
struct Counts {
    tabled: usize,
    dynamic: usize,
    split: usize,
    encrypted: usize,
}

fn literal_kind(lit: &Literal) -> &'static str {
    match lit {
        Literal::Unit => "unit",
        Literal::Bool(_) => "bool",
        Literal::Int(_) => "int",
        Literal::Float(_) => "float",
        Literal::Str(_) => "string",
        Literal::Tuple(_) => "tuple",
    }
}

pub fn run(module: &mut Module, config: &DataConfig, cx: &mut PassContext) -> Result<bool> {
    if !config.any() {
        return Ok(false);
    }
    let mut tables = TableBuilder::new(module.tables.len() as u32);
    let mut changed = false;
    let Module {
        functions,
        strings: records,
        ..
    } = module;

    for (fi, func) in functions.iter_mut().enumerate() {
        let mut counts = Counts::default();
        let mut next_cell = func.lazy_cells();
        let sites: Vec<_> = func
            .live_exprs()
            .into_iter()
            .filter_map(|id| match func.expr(id) {
                Expr::Lit(lit) => Some((id, lit.clone())),
                _ => None,
            })
            .collect();

        for (id, lit) in sites {
            let numeric = match lit {
                Literal::Int(v) => Some(Numeric::Int(v)),
                Literal::Float(v) => Some(Numeric::Float(v)),
                _ => None,
            };
            if let Some(n) = numeric {
                if !config.numeric() {
                    continue;
                }
                if let Some(p) = config.encoding_table {
                    if cx.chance(p) {
                        if let Some(expr) = tables.claim(fi, id, &lit) {
                            func.exprs[id.index()] = expr;
                            counts.tabled += 1;
                            continue;
                        }
                    }
                }
                if let Some(p) = config.dynamic_calculation {
                    if cx.chance(p) {
                        match n {
                            Numeric::Int(v) => dynamic::dynamic_int_at(func, id, v, next_cell, &mut cx.rng),
                            Numeric::Float(v) => {
                                dynamic::dynamic_float_at(func, id, v, next_cell, &mut cx.rng)
                            }
                        }
                        next_cell += 1;
                        counts.dynamic += 1;
                        continue;
                    }
                }
                if let Some(t) = config.constant_splitting {
                    match n {
                        Numeric::Int(v) => split::split_int_at(func, id, v, t, &mut cx.rng),
                        Numeric::Float(v) => split::split_float_at(func, id, v, t, &mut cx.rng),
                    }
                    counts.split += 1;
                }
                continue;
            }
            match &lit {
                Literal::Str(s) if config.string_encryption.is_some() => {
                    let expr = strings::encrypt_literal(records, &cx.master_secret, s, &mut cx.rng)?;
                    func.exprs[id.index()] = expr;
                    counts.encrypted += 1;
                }
                Literal::Tuple(_) => {
                    let diagnostic = Diagnostic::UnsupportedLiteral {
                        function: func.name.clone(),
                        expr: id,
                        literal: literal_kind(&lit),
                    };
                    cx.diagnose(diagnostic);
                }
                _ => {}
            }
        }

        debug!(
            function = %func.name,
            tabled = counts.tabled,
            dynamic = counts.dynamic,
            split = counts.split,
            encrypted = counts.encrypted,
            "data pass"
        );
        changed |= counts.tabled + counts.dynamic + counts.split + counts.encrypted > 0;
    }

    if !records.is_empty() {
        module.string_key = Some(cx.master_secret);
    }
    tables.finish(module, &mut cx.rng);
    Ok(changed)
}
