//! Bin iterator: comparator-ordered range over the string-bin space.
//!
//! Walks the bins a comparator's [`ValueRange`](crate::cmp::ValueRange)
//! selects and streams each bin's primitives. The produced order is
//! *value* order under the comparator, not id order, so the iterator
//! reports `sorted = false` for set algebra but advertises its
//! comparator through `ordering()` so the sort engine can recognise an
//! already-sorted scan.

use std::sync::Arc;

use crate::cmp::{Comparator, ValueRange};
use crate::cursor::scan::escape_token;
use crate::error::{Advance, GraphError, GraphResult, Membership, Progress};
use crate::ident::Id;
use crate::store::{PrimitiveStore, Store};

use super::{
    Budget, Direction, FreezeFlags, IdIterator, IterKind, RangeEstimate, Statistics, COST_CALL,
    COST_INDEX, COST_PRIMITIVE,
};

/// One bin's worth of pending ids.
#[derive(Debug)]
struct CurrentBin {
    bin: usize,
    value: String,
    ids: Vec<Id>,
    pos: usize,
}

/// Comparator-driven bin walk; see the module docs.
#[derive(Debug)]
pub struct BinIterator {
    store: Store,
    cmp: Arc<dyn Comparator>,
    low_value: Option<String>,
    high_value: Option<String>,
    vrange: Box<dyn ValueRange>,
    dir: Direction,
    low: Id,
    high: Id,
    current: Option<CurrentBin>,
    exhausted: bool,
    last: Option<Id>,
    stats: Option<Statistics>,
}

impl BinIterator {
    pub fn new(
        store: &Store,
        cmp: Arc<dyn Comparator>,
        low_value: Option<&str>,
        high_value: Option<&str>,
        low: Id,
        high: Id,
        dir: Direction,
    ) -> GraphResult<BinIterator> {
        let vrange = cmp
            .vrange(store, low_value, high_value, dir.into())
            .ok_or_else(|| {
                GraphError::Semantics(format!(
                    "comparator {} has no range implementation",
                    cmp.name()
                ))
            })?;
        Ok(BinIterator {
            store: store.clone(),
            cmp,
            low_value: low_value.map(str::to_string),
            high_value: high_value.map(str::to_string),
            vrange,
            dir,
            low,
            high: high.min(Id::new(store.primitive_n())),
            current: None,
            exhausted: false,
            last: None,
            stats: None,
        })
    }

    /// Load the next bin with any in-range primitives, or mark the walk
    /// exhausted.
    fn load_next_bin(&mut self, budget: &mut Budget) -> GraphResult<Option<()>> {
        loop {
            if !budget.charge(COST_INDEX) {
                return Ok(None);
            }
            let Some(bin) = self.vrange.next_bin() else {
                self.exhausted = true;
                return Ok(Some(()));
            };
            let Some(value) = self.store.bin_start(bin) else {
                continue;
            };
            if !self.vrange.value_in_range(&value) {
                continue;
            }
            let ids = self.store.bin_candidates(bin, self.low, self.high);
            if ids.is_empty() {
                continue;
            }
            self.current = Some(CurrentBin {
                bin,
                value,
                ids,
                pos: 0,
            });
            return Ok(Some(()));
        }
    }
}

impl IdIterator for BinIterator {
    fn kind(&self) -> IterKind {
        IterKind::Bin
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        false
    }

    fn ordering(&self) -> Option<&str> {
        Some(self.cmp.name())
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        if !budget.charge(COST_INDEX) {
            return Ok(Progress::Suspend);
        }
        self.stats = Some(Statistics {
            check_cost: COST_PRIMITIVE,
            next_cost: COST_INDEX,
            find_cost: u64::MAX / 2,
            n: self.vrange.size_estimate(),
            sorted: false,
        });
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        self.stats
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        loop {
            if self.exhausted {
                return Ok(Advance::End);
            }
            if let Some(cur) = &mut self.current {
                if cur.pos < cur.ids.len() {
                    if !budget.charge(COST_CALL) {
                        return Ok(Advance::Suspend);
                    }
                    let id = cur.ids[cur.pos];
                    cur.pos += 1;
                    self.last = Some(id);
                    return Ok(Advance::Id(id));
                }
                self.current = None;
            }
            if self.load_next_bin(budget)?.is_none() {
                return Ok(Advance::Suspend);
            }
        }
    }

    fn find(&mut self, _target: Id, _budget: &mut Budget) -> GraphResult<Advance> {
        Err(GraphError::Internal(
            "find on a value-ordered bin iterator".into(),
        ))
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        if !budget.charge(COST_PRIMITIVE) {
            return Ok(Membership::Suspend);
        }
        if id < self.low || id >= self.high {
            return Ok(Membership::No);
        }
        let p = self.store.primitive_read(id)?;
        let Some(value) = p.value.as_deref() else {
            return Ok(Membership::No);
        };
        Ok(if self.vrange.value_in_range(value) {
            Membership::Yes
        } else {
            Membership::No
        })
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        // Clones restart the walk; a clone that must keep position goes
        // through freeze/thaw instead.
        let vrange = self
            .cmp
            .vrange(
                &self.store,
                self.low_value.as_deref(),
                self.high_value.as_deref(),
                self.dir.into(),
            )
            .unwrap_or_else(|| {
                // The constructor proved a vrange exists; a missing one
                // here means the comparator table changed under us.
                unreachable!("comparator lost its range implementation")
            });
        Box::new(BinIterator {
            store: self.store.clone(),
            cmp: self.cmp.clone(),
            low_value: self.low_value.clone(),
            high_value: self.high_value.clone(),
            vrange,
            dir: self.dir,
            low: self.low,
            high: self.high,
            current: None,
            exhausted: false,
            last: None,
            stats: self.stats,
        })
    }

    fn reset(&mut self) {
        let vrange = self.cmp.vrange(
            &self.store,
            self.low_value.as_deref(),
            self.high_value.as_deref(),
            self.dir.into(),
        );
        if let Some(vrange) = vrange {
            self.vrange = vrange;
        }
        self.current = None;
        self.exhausted = false;
        self.last = None;
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            slices.push(format!(
                "bin:{}[{}-{}]:{}:{}:{}",
                self.dir.token(),
                self.low,
                self.high,
                self.cmp.name(),
                self.low_value.as_deref().map_or_else(String::new, escape_token),
                self.high_value.as_deref().map_or_else(String::new, escape_token),
            ));
        }
        if flags.position {
            let mut vr = String::new();
            self.vrange.freeze(&mut vr);
            // A partially drained bin must be re-entered on thaw; the
            // vrange cursor has already moved past it. A drained bin
            // resumes from the vrange alone.
            let (bin, pos) = match &self.current {
                Some(cur) if cur.pos < cur.ids.len() => {
                    (cur.bin.to_string(), cur.pos)
                }
                _ => ("*".to_string(), 0),
            };
            slices.push(format!(
                "({}):{}:{}:{}",
                vr,
                bin,
                pos,
                self.last.map_or_else(|| "*".to_string(), |id| id.to_string())
            ));
        }
        if flags.state {
            slices.push(String::new());
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        let Some(cur) = &self.current else {
            return Ok(self.exhausted);
        };
        let p = self.store.primitive_read(id)?;
        let Some(value) = p.value.as_deref() else {
            return Ok(false);
        };
        // Past `value` when the current bin already sorts after it in
        // the walk direction.
        let ord = self.cmp.sort_compare(value, &cur.value);
        Ok(match self.dir {
            Direction::Forward => ord == std::cmp::Ordering::Less,
            Direction::Backward => ord == std::cmp::Ordering::Greater,
        })
    }

    fn range_estimate(&self) -> RangeEstimate {
        RangeEstimate {
            low: self.low,
            high: self.high,
            n_exact: None,
            n_max: self
                .stats
                .map_or(u64::MAX, |s| s.n.max(1) * self.store.bin_density()),
        }
    }

    fn last_id(&self) -> Option<Id> {
        self.last
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Thaw-time repositioning: replay a frozen position into a fresh
/// walk. A recorded bin is re-entered at its in-bin offset; otherwise
/// the vrange cursor alone decides what comes next.
pub(crate) fn replay_position(
    it: &mut BinIterator,
    frozen_vrange: &str,
    bin: Option<usize>,
    in_bin: usize,
    last: Option<Id>,
) -> GraphResult<()> {
    it.vrange = it.cmp.vrange_thaw(&it.store, frozen_vrange)?;
    it.current = None;
    it.exhausted = false;
    it.last = last;
    if let Some(bin) = bin {
        let Some(value) = it.store.bin_start(bin) else {
            return Err(GraphError::BadCursor(format!("bin {bin} vanished")));
        };
        let ids = it.store.bin_candidates(bin, it.low, it.high);
        it.current = Some(CurrentBin {
            bin,
            value,
            ids,
            pos: in_bin,
        });
    }
    Ok(())
}
