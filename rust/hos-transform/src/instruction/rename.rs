//! Identifier renaming.
//!
//! Locals are renamed per function scope; every reference is by [`LocalId`],
//! so one map entry per local rewrites all of its uses consistently.
//! Non-exported functions are renamed module-wide; calls refer to
//! functions by id and need no rewriting.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

use hos_core::ir::{Function, LocalId, Module};

const ALPHABET: &[u8] = b"Il1";
const NAME_LEN: usize = 12;

/// Generates names unique among everything it has seen or produced.
#[derive(Debug, Default)]
pub struct NameGen {
    used: BTreeSet<String>,
}

impl NameGen {
    pub fn reserving<I: IntoIterator<Item = String>>(names: I) -> Self {
        Self {
            used: names.into_iter().collect(),
        }
    }

    pub fn fresh<R: Rng>(&mut self, rng: &mut R) -> String {
        loop {
            let mut name = String::with_capacity(NAME_LEN);
            // First character must not be a digit.
            name.push(if rng.gen_bool(0.5) { 'I' } else { 'l' });
            for _ in 1..NAME_LEN {
                name.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
            }
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }

    /// `stem_NNNN`, unique the same way as [`NameGen::fresh`].
    pub fn numbered<R: Rng>(&mut self, stem: &str, rng: &mut R) -> String {
        loop {
            let name = format!("{stem}_{}", rng.gen_range(1000..10_000));
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Renames every local of `f`. Returns the scope's map.
pub fn rename_locals<R: Rng>(f: &mut Function, rng: &mut R) -> BTreeMap<LocalId, String> {
    let mut gen = NameGen::reserving(f.local_names());
    let mut map = BTreeMap::new();
    for (i, local) in f.locals.iter_mut().enumerate() {
        let new = gen.fresh(rng);
        local.name = new.clone();
        map.insert(LocalId(i as u32), new);
    }
    map
}

/// Renames non-exported functions. Returns `(old, new)` pairs.
pub fn rename_functions<R: Rng>(module: &mut Module, rng: &mut R) -> Vec<(String, String)> {
    let mut gen = NameGen::reserving(module.functions.iter().map(|f| f.name.clone()));
    let mut renamed = Vec::new();
    for f in module.functions.iter_mut().filter(|f| !f.exported) {
        let new = gen.fresh(rng);
        renamed.push((std::mem::replace(&mut f.name, new.clone()), new));
    }
    renamed
}
