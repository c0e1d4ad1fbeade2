//! Sort-window sampling.
//!
//! A sort context exists only when the constraint carries a sort
//! pattern, a page size exists, and the iterator's natural order does
//! not already satisfy the sort. It keeps the best `start + pagesize`
//! rows seen so far in key order; rows that fall off the window edge
//! still count toward the total but are discarded.
//!
//! `accept_prefilter` is the cheap gate: once the window is full, a
//! candidate whose key sorts at-or-after the current edge cannot enter
//! the window, so the engine skips materialising its row entirely.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cmp::Comparator;
use crate::constraint::{Pattern, SortKey};
use crate::error::{GraphError, GraphResult};
use crate::ident::Guid;
use crate::store::Primitive;

use super::value::Value;

/// One sort key extracted from a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum SortAtom {
    Null,
    Str(String),
    Int(i64),
    Guid(Guid),
    Bool(bool),
}

/// Where a candidate landed relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreFilter {
    /// May enter the window; materialise the row.
    Inside,
    /// Provably outside; count it and move on.
    Outside,
}

struct Entry {
    key: Vec<SortAtom>,
    row: Value,
}

/// Bounded best-k window over sort keys; see the module docs.
pub struct SortContext {
    keys: Vec<SortKey>,
    cmp: Arc<dyn Comparator>,
    /// start + pagesize.
    window: usize,
    entries: Vec<Entry>,
    /// Rows pushed off the window edge (still counted).
    overflow: u64,
}

impl SortContext {
    pub fn new(keys: Vec<SortKey>, cmp: Arc<dyn Comparator>, window: usize) -> SortContext {
        SortContext {
            keys,
            cmp,
            window: window.max(1),
            entries: Vec::new(),
            overflow: 0,
        }
    }

    /// Extract the sort key for a candidate.
    pub fn key_of(&self, p: &Primitive) -> GraphResult<Vec<SortAtom>> {
        self.keys.iter().map(|k| atom_of(&k.pattern, p)).collect()
    }

    /// Cheap gate using just the key.
    pub fn accept_prefilter(&self, key: &[SortAtom]) -> PreFilter {
        if self.entries.len() < self.window {
            return PreFilter::Inside;
        }
        let edge = match self.entries.last() {
            Some(e) => &e.key,
            None => return PreFilter::Inside,
        };
        if self.compare_keys(key, edge) == Ordering::Less {
            PreFilter::Inside
        } else {
            PreFilter::Outside
        }
    }

    /// Insert a materialised row under its key.
    pub fn accept(&mut self, key: Vec<SortAtom>, row: Value) {
        let at = self
            .entries
            .partition_point(|e| self.compare_keys(&e.key, &key) != Ordering::Greater);
        self.entries.insert(at, Entry { key, row });
        if self.entries.len() > self.window {
            self.entries.pop();
            self.overflow += 1;
        }
    }

    /// Count a row known to fall outside the window.
    pub fn count_outside(&mut self) {
        self.overflow += 1;
    }

    /// Rows accepted so far, window plus overflow.
    pub fn total(&self) -> u64 {
        self.entries.len() as u64 + self.overflow
    }

    /// Finish: the window rows from `start` on, in key order.
    pub fn finish(mut self, start: usize) -> Vec<Value> {
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries.drain(..start);
        self.entries.into_iter().map(|e| e.row).collect()
    }

    fn compare_keys(&self, a: &[SortAtom], b: &[SortAtom]) -> Ordering {
        for (i, sk) in self.keys.iter().enumerate() {
            let (Some(ka), Some(kb)) = (a.get(i), b.get(i)) else {
                return Ordering::Equal;
            };
            let ord = self.compare_atoms(&sk.pattern, ka, kb);
            let ord = if sk.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn compare_atoms(&self, pattern: &Pattern, a: &SortAtom, b: &SortAtom) -> Ordering {
        match (a, b) {
            // Absent keys sort after present ones.
            (SortAtom::Null, SortAtom::Null) => Ordering::Equal,
            (SortAtom::Null, _) => Ordering::Greater,
            (_, SortAtom::Null) => Ordering::Less,
            (SortAtom::Str(a), SortAtom::Str(b)) => {
                if matches!(pattern, Pattern::Value) {
                    self.cmp.sort_compare(a, b)
                } else {
                    a.to_lowercase().cmp(&b.to_lowercase())
                }
            }
            (SortAtom::Int(a), SortAtom::Int(b)) => a.cmp(b),
            (SortAtom::Guid(a), SortAtom::Guid(b)) => a.cmp(b),
            (SortAtom::Bool(a), SortAtom::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

fn atom_of(pattern: &Pattern, p: &Primitive) -> GraphResult<SortAtom> {
    Ok(match pattern {
        Pattern::Value => p.value.clone().map_or(SortAtom::Null, SortAtom::Str),
        Pattern::Name => p.name.clone().map_or(SortAtom::Null, SortAtom::Str),
        Pattern::Guid => SortAtom::Guid(p.guid),
        Pattern::Timestamp => SortAtom::Int(p.timestamp as i64),
        Pattern::Live => SortAtom::Bool(p.live),
        Pattern::Archival => SortAtom::Bool(p.archival),
        Pattern::Left | Pattern::Right | Pattern::Typeguid | Pattern::Scope => {
            let which = match pattern {
                Pattern::Left => crate::store::Linkage::Left,
                Pattern::Right => crate::store::Linkage::Right,
                Pattern::Typeguid => crate::store::Linkage::Typeguid,
                _ => crate::store::Linkage::Scope,
            };
            p.linkage(which).map_or(SortAtom::Null, SortAtom::Guid)
        }
        other => {
            return Err(GraphError::Semantics(format!(
                "pattern {other:?} cannot be a sort key"
            )))
        }
    })
}
