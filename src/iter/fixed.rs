//! Leaf iterators: `null`, `all`, and the materialised `fixed` set.
//!
//! `fixed` is the workhorse small set: sorted id array, O(log n)
//! `find`/`check`, and the target of the OR construction-time
//! `become_small_set` rewrite. It optionally carries an original
//! handle so stored-cursor instances can detect substitution.

use crate::error::{Advance, GraphResult, Membership, Progress};
use crate::ident::Id;
use crate::store::{PrimitiveStore, Store};

use super::{
    beyond_by_id, Budget, Direction, FreezeFlags, IdIterator, IterKind, OriginalHandle,
    PrimitiveSummary, RangeEstimate, Restriction, Statistics, COST_CALL,
};

/// The empty stream.
#[derive(Debug)]
pub struct NullIterator {
    dir: Direction,
}

impl NullIterator {
    pub fn new(dir: Direction) -> NullIterator {
        NullIterator { dir }
    }
}

impl IdIterator for NullIterator {
    fn kind(&self) -> IterKind {
        IterKind::Null
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        true
    }

    fn id_range(&self) -> (Id, Id) {
        (Id::ZERO, Id::ZERO)
    }

    fn statistics(&mut self, _budget: &mut Budget) -> GraphResult<Progress> {
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        Some(Statistics {
            check_cost: 0,
            next_cost: 0,
            find_cost: 0,
            n: 0,
            sorted: true,
        })
    }

    fn next_id(&mut self, _budget: &mut Budget) -> GraphResult<Advance> {
        Ok(Advance::End)
    }

    fn find(&mut self, _target: Id, _budget: &mut Budget) -> GraphResult<Advance> {
        Ok(Advance::End)
    }

    fn check(&mut self, _id: Id, _budget: &mut Budget) -> GraphResult<Membership> {
        Ok(Membership::No)
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        Box::new(NullIterator { dir: self.dir })
    }

    fn reset(&mut self) {}

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            slices.push("null:".to_string());
        }
        if flags.position {
            slices.push(String::new());
        }
        if flags.state {
            slices.push(String::new());
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn beyond(&self, _id: Id) -> GraphResult<bool> {
        Ok(true)
    }

    fn range_estimate(&self) -> RangeEstimate {
        RangeEstimate {
            low: Id::ZERO,
            high: Id::ZERO,
            n_exact: Some(0),
            n_max: 0,
        }
    }

    fn last_id(&self) -> Option<Id> {
        None
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// The id universe `[low, high)`, clamped to the store snapshot at
/// construction.
#[derive(Debug)]
pub struct AllIterator {
    low: Id,
    high: Id,
    dir: Direction,
    /// Next raw id to produce, `None` when exhausted.
    cursor: Option<u64>,
    last: Option<Id>,
}

impl AllIterator {
    pub fn new(store: &Store, low: Id, high: Id, dir: Direction) -> AllIterator {
        let snapshot = Id::new(store.primitive_n());
        let high = high.min(snapshot);
        let low = low.min(high);
        let mut it = AllIterator {
            low,
            high,
            dir,
            cursor: None,
            last: None,
        };
        it.reset();
        it
    }

    pub(crate) fn from_bounds(low: Id, high: Id, dir: Direction) -> AllIterator {
        let mut it = AllIterator {
            low,
            high: high.max(low),
            dir,
            cursor: None,
            last: None,
        };
        it.reset();
        it
    }

    fn span(&self) -> u64 {
        self.high.raw().saturating_sub(self.low.raw())
    }

    pub(crate) fn set_cursor_raw(&mut self, cursor: Option<u64>, last: Option<Id>) {
        self.cursor = cursor;
        self.last = last;
    }
}

impl IdIterator for AllIterator {
    fn kind(&self) -> IterKind {
        IterKind::All
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        true
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, _budget: &mut Budget) -> GraphResult<Progress> {
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        Some(Statistics {
            check_cost: COST_CALL,
            next_cost: COST_CALL,
            find_cost: COST_CALL,
            n: self.span(),
            sorted: true,
        })
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        let Some(cur) = self.cursor else {
            return Ok(Advance::End);
        };
        if !budget.charge(COST_CALL) {
            return Ok(Advance::Suspend);
        }
        let id = Id::new(cur);
        self.cursor = match self.dir {
            Direction::Forward => {
                if cur + 1 < self.high.raw() {
                    Some(cur + 1)
                } else {
                    None
                }
            }
            Direction::Backward => {
                if cur > self.low.raw() {
                    Some(cur - 1)
                } else {
                    None
                }
            }
        };
        self.last = Some(id);
        Ok(Advance::Id(id))
    }

    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance> {
        if !budget.charge(COST_CALL) {
            return Ok(Advance::Suspend);
        }
        let clamped = match self.dir {
            Direction::Forward => {
                if target >= self.high {
                    self.cursor = None;
                    return Ok(Advance::End);
                }
                target.max(self.low)
            }
            Direction::Backward => {
                if target < self.low {
                    self.cursor = None;
                    return Ok(Advance::End);
                }
                target.min(Id::new(self.high.raw().saturating_sub(1)))
            }
        };
        self.cursor = Some(clamped.raw());
        self.next_id(budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        if !budget.charge(COST_CALL) {
            return Ok(Membership::Suspend);
        }
        Ok(if id >= self.low && id < self.high {
            Membership::Yes
        } else {
            Membership::No
        })
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        Box::new(AllIterator::from_bounds(self.low, self.high, self.dir))
    }

    fn reset(&mut self) {
        self.last = None;
        self.cursor = if self.low >= self.high {
            None
        } else {
            Some(match self.dir {
                Direction::Forward => self.low.raw(),
                Direction::Backward => self.high.raw() - 1,
            })
        };
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            slices.push(format!(
                "all:{}[{}-{}]",
                self.dir.token(),
                self.low,
                self.high
            ));
        }
        if flags.position {
            slices.push(self.cursor.map_or_else(
                || "*".to_string(),
                |c| format!("{:x}", c),
            ));
        }
        if flags.state {
            slices.push(String::new());
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        Ok(beyond_by_id(self.dir, self.last, id))
    }

    fn range_estimate(&self) -> RangeEstimate {
        RangeEstimate {
            low: self.low,
            high: self.high,
            n_exact: Some(self.span()),
            n_max: self.span(),
        }
    }

    fn last_id(&self) -> Option<Id> {
        self.last
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Sorted materialised id set.
#[derive(Debug)]
pub struct FixedIterator {
    store: Option<Store>,
    /// Ascending, deduplicated.
    ids: Vec<Id>,
    /// Count of ids already produced in the current direction.
    offset: usize,
    dir: Direction,
    last: Option<Id>,
    original: Option<(OriginalHandle, u64)>,
    summary: Option<PrimitiveSummary>,
}

impl FixedIterator {
    pub fn new(ids: Vec<Id>, dir: Direction) -> FixedIterator {
        let mut ids = ids;
        ids.sort_unstable();
        ids.dedup();
        FixedIterator {
            store: None,
            ids,
            offset: 0,
            dir,
            last: None,
            original: None,
            summary: None,
        }
    }

    pub fn with_store(mut self, store: Store) -> FixedIterator {
        self.store = Some(store);
        self
    }

    /// Declare a summary every member is known to satisfy (used when a
    /// fixed set was materialised out of a structured source).
    pub fn with_summary(mut self, summary: PrimitiveSummary) -> FixedIterator {
        self.summary = Some(summary);
        self
    }

    pub fn attach_original(&mut self, handle: OriginalHandle) {
        let generation = handle.read().generation;
        self.original = Some((handle, generation));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    fn log_cost(&self) -> u64 {
        (usize::BITS - self.ids.len().leading_zeros()) as u64 + 1
    }

    /// Index of the next id to produce, or `None` at end.
    fn next_index(&self) -> Option<usize> {
        if self.offset >= self.ids.len() {
            return None;
        }
        Some(match self.dir {
            Direction::Forward => self.offset,
            Direction::Backward => self.ids.len() - 1 - self.offset,
        })
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: usize, last: Option<Id>) {
        self.offset = offset.min(self.ids.len());
        self.last = last;
    }
}

impl IdIterator for FixedIterator {
    fn kind(&self) -> IterKind {
        IterKind::Fixed
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        true
    }

    fn id_range(&self) -> (Id, Id) {
        match (self.ids.first(), self.ids.last()) {
            (Some(first), Some(last)) => (*first, last.next()),
            _ => (Id::ZERO, Id::ZERO),
        }
    }

    fn statistics(&mut self, _budget: &mut Budget) -> GraphResult<Progress> {
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        Some(Statistics {
            check_cost: self.log_cost(),
            next_cost: COST_CALL,
            find_cost: self.log_cost(),
            n: self.ids.len() as u64,
            sorted: true,
        })
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        let Some(index) = self.next_index() else {
            return Ok(Advance::End);
        };
        if !budget.charge(COST_CALL) {
            return Ok(Advance::Suspend);
        }
        let id = self.ids[index];
        self.offset += 1;
        self.last = Some(id);
        Ok(Advance::Id(id))
    }

    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance> {
        if !budget.charge(self.log_cost()) {
            return Ok(Advance::Suspend);
        }
        // partition_point gives the first index >= target.
        let at = self.ids.partition_point(|id| *id < target);
        self.offset = match self.dir {
            Direction::Forward => at,
            Direction::Backward => {
                // First index at-or-before target, from the back.
                let at_or_before = if at < self.ids.len() && self.ids[at] == target {
                    at + 1
                } else {
                    at
                };
                self.ids.len() - at_or_before
            }
        };
        self.last = None;
        self.next_id(budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        if !budget.charge(self.log_cost()) {
            return Ok(Membership::Suspend);
        }
        Ok(if self.ids.binary_search(&id).is_ok() {
            Membership::Yes
        } else {
            Membership::No
        })
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        Box::new(FixedIterator {
            store: self.store.clone(),
            ids: self.ids.clone(),
            offset: 0,
            dir: self.dir,
            last: None,
            original: self.original.clone(),
            summary: self.summary,
        })
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.last = None;
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            let (low, high) = self.id_range();
            let members: Vec<String> = self.ids.iter().map(ToString::to_string).collect();
            slices.push(format!(
                "fixed:{}[{}-{}]:{}:{}",
                self.dir.token(),
                low,
                high,
                self.ids.len(),
                members.join(",")
            ));
        }
        if flags.position {
            slices.push(format!(
                "{}:{}",
                self.offset,
                self.last.map_or_else(|| "*".to_string(), |id| id.to_string())
            ));
        }
        if flags.state {
            slices.push(String::new());
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        self.summary
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        Ok(beyond_by_id(self.dir, self.last, id))
    }

    fn range_estimate(&self) -> RangeEstimate {
        let (low, high) = self.id_range();
        RangeEstimate {
            low,
            high,
            n_exact: Some(self.ids.len() as u64),
            n_max: self.ids.len() as u64,
        }
    }

    fn restrict(&self, psum: &PrimitiveSummary) -> GraphResult<Restriction> {
        if psum.is_empty() {
            return Ok(Restriction::Already);
        }
        if let Some(own) = &self.summary {
            if own.merge(psum) == Some(*own) {
                return Ok(Restriction::Already);
            }
        }
        let Some(store) = &self.store else {
            // Without store access the set cannot be narrowed; the
            // caller falls back to per-candidate checks.
            return Ok(Restriction::Already);
        };
        let mut kept = Vec::new();
        for id in &self.ids {
            let p = store.primitive_read(*id)?;
            if psum.matches(&p) {
                kept.push(*id);
            }
        }
        if kept.is_empty() {
            return Ok(Restriction::No);
        }
        if kept.len() == self.ids.len() {
            return Ok(Restriction::Already);
        }
        let mut out = FixedIterator::new(kept, self.dir).with_summary(*psum);
        out.store = self.store.clone();
        Ok(Restriction::New(Box::new(out)))
    }

    fn original(&self) -> Option<OriginalHandle> {
        self.original.as_ref().map(|(h, _)| h.clone())
    }

    fn original_stale(&self) -> bool {
        self.original
            .as_ref()
            .is_some_and(|(h, seen)| h.read().generation != *seen)
    }

    fn last_id(&self) -> Option<Id> {
        self.last
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<Id> {
        raw.iter().map(|r| Id::new(*r)).collect()
    }

    fn drain(it: &mut dyn IdIterator) -> Vec<u64> {
        let mut budget = Budget::unlimited();
        let mut out = Vec::new();
        loop {
            match it.next_id(&mut budget).unwrap() {
                Advance::Id(id) => out.push(id.raw()),
                Advance::End => return out,
                Advance::Suspend => panic!("unlimited budget suspended"),
            }
        }
    }

    #[test]
    fn test_null() {
        let mut it = NullIterator::new(Direction::Forward);
        assert!(drain(&mut it).is_empty());
        let mut budget = Budget::unlimited();
        assert_eq!(
            it.check(Id::new(1), &mut budget).unwrap(),
            Membership::No
        );
    }

    #[test]
    fn test_all_bounds() {
        let mut it = AllIterator::from_bounds(Id::new(2), Id::new(5), Direction::Forward);
        assert_eq!(drain(&mut it), vec![2, 3, 4]);

        let mut it = AllIterator::from_bounds(Id::new(2), Id::new(5), Direction::Backward);
        assert_eq!(drain(&mut it), vec![4, 3, 2]);
    }

    #[test]
    fn test_fixed_sorts_and_dedups() {
        let mut it = FixedIterator::new(ids(&[7, 3, 7, 1]), Direction::Forward);
        assert_eq!(drain(&mut it), vec![1, 3, 7]);
    }

    #[test]
    fn test_fixed_backward() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Backward);
        assert_eq!(drain(&mut it), vec![7, 3, 1]);
    }

    #[test]
    fn test_fixed_find_forward() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Forward);
        let mut budget = Budget::unlimited();
        assert_eq!(
            it.find(Id::new(2), &mut budget).unwrap(),
            Advance::Id(Id::new(3))
        );
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(7)));
        assert_eq!(it.find(Id::new(8), &mut budget).unwrap(), Advance::End);
    }

    #[test]
    fn test_fixed_find_backward() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Backward);
        let mut budget = Budget::unlimited();
        // Backward find: first id at-or-before the target.
        assert_eq!(
            it.find(Id::new(5), &mut budget).unwrap(),
            Advance::Id(Id::new(3))
        );
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(1)));
        assert_eq!(
            it.find(Id::new(7), &mut budget).unwrap(),
            Advance::Id(Id::new(7))
        );
        assert_eq!(it.find(Id::new(0), &mut budget).unwrap(), Advance::End);
    }

    #[test]
    fn test_fixed_check() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Forward);
        let mut budget = Budget::unlimited();
        assert_eq!(it.check(Id::new(3), &mut budget).unwrap(), Membership::Yes);
        assert_eq!(it.check(Id::new(4), &mut budget).unwrap(), Membership::No);
    }

    #[test]
    fn test_fixed_suspend_on_empty_budget() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Forward);
        let mut budget = Budget::new(0);
        assert!(it.next_id(&mut budget).unwrap().is_suspend());
        // Position did not advance; a fresh budget resumes at the start.
        let mut budget = Budget::unlimited();
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(1)));
    }

    #[test]
    fn test_clone_has_independent_position() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Forward);
        let mut budget = Budget::unlimited();
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(1)));
        let mut clone = it.clone_iter();
        assert_eq!(clone.next_id(&mut budget).unwrap(), Advance::Id(Id::new(1)));
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(3)));
        assert_eq!(clone.next_id(&mut budget).unwrap(), Advance::Id(Id::new(3)));
    }

    #[test]
    fn test_beyond() {
        let mut it = FixedIterator::new(ids(&[1, 3, 7]), Direction::Forward);
        let mut budget = Budget::unlimited();
        assert!(!it.beyond(Id::new(3)).unwrap());
        it.next_id(&mut budget).unwrap();
        it.next_id(&mut budget).unwrap();
        it.next_id(&mut budget).unwrap();
        assert!(it.beyond(Id::new(3)).unwrap());
    }
}
