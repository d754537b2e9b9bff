//! Encoding table: claimed literals move into one per-module table and are
//! read back through [`Expr::TableLoad`]. Slots are shuffled per build once
//! every function has been visited.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use hos_core::ir::{EncodingTable, Expr, ExprId, Literal, Module};

/// Bit-exact identity of a numeric literal, for dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKey {
    Int(i64),
    Float(u64),
}

#[derive(Debug)]
pub struct TableBuilder {
    table: u32,
    entries: Vec<Literal>,
    lookup: BTreeMap<EntryKey, u32>,
    /// (function index, expression) of every rewritten site.
    sites: Vec<(usize, ExprId)>,
}

impl TableBuilder {
    /// `table` is the index the finished table will occupy in the module.
    pub fn new(table: u32) -> Self {
        Self {
            table,
            entries: Vec::new(),
            lookup: BTreeMap::new(),
            sites: Vec::new(),
        }
    }

    fn slot_for(&mut self, lit: &Literal) -> Option<u32> {
        let key = match lit {
            Literal::Int(i) => EntryKey::Int(*i),
            Literal::Float(x) => EntryKey::Float(x.to_bits()),
            _ => return None,
        };
        if let Some(&slot) = self.lookup.get(&key) {
            return Some(slot);
        }
        let slot = self.entries.len() as u32;
        self.entries.push(lit.clone());
        self.lookup.insert(key, slot);
        Some(slot)
    }

    /// Claims the literal at `id`. Returns the replacement expression, or
    /// `None` for non-numeric literals.
    pub fn claim(&mut self, function: usize, id: ExprId, lit: &Literal) -> Option<Expr> {
        let slot = self.slot_for(lit)?;
        self.sites.push((function, id));
        Some(Expr::TableLoad {
            table: self.table,
            slot,
        })
    }

    /// Shuffles the table, remaps every site and installs the table.
    pub fn finish<R: Rng>(self, module: &mut Module, rng: &mut R) {
        if self.entries.is_empty() {
            return;
        }
        let mut order: Vec<u32> = (0..self.entries.len() as u32).collect();
        order.shuffle(rng);
        // order[new] = old
        let mut remap = vec![0u32; order.len()];
        for (new, old) in order.iter().enumerate() {
            remap[*old as usize] = new as u32;
        }
        let entries = order
            .iter()
            .map(|old| self.entries[*old as usize].clone())
            .collect();
        for (fi, id) in self.sites {
            if let Some(Expr::TableLoad { slot, .. }) = module
                .functions
                .get_mut(fi)
                .and_then(|f| f.exprs.get_mut(id.index()))
            {
                *slot = remap[*slot as usize];
            }
        }
        debug_assert_eq!(module.tables.len() as u32, self.table);
        module.tables.push(EncodingTable { entries });
    }
}
