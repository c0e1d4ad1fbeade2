//! OR iterator: union of id streams.
//!
//! Two modes, decided by the children:
//!
//! - **Sorted path.** Every child holds a "pending" id. Children with
//!   pending ids live in an active chain ordered by pending id (head
//!   first in the iterator's direction); exhausted children move to an
//!   EOF list. `next` delivers the head's pending id, invalidates
//!   *every* child holding an equal pending id in the same round, and
//!   re-fills them, re-inserting with an insertion sort anchored at a
//!   last-inserted memo. Smallest id wins a tie going forward, largest
//!   going backward.
//! - **Unsorted path.** Children are drained one after another. Each
//!   produced id is checked against every already-exhausted child and
//!   skipped if one of them owns it: that child produced it earlier.
//!
//! A resume id from the cursor codec is a *must-skip*: catch-up `find`s
//! on every child and children positioned at the resume id itself are
//! advanced once more.
//!
//! Construction-time rewrites (`create_commit`): nulls are dropped,
//! `or()` is null, `or(x)` is `x`, and an OR whose children are all
//! cheap and small is materialised into a fixed set. A thaw defers the
//! rewrites so a frozen shape reconstructs exactly.

use crate::error::{Advance, GraphError, GraphResult, Membership, Progress};
use crate::ident::Id;

use super::{
    BoxedIter, Budget, Direction, FixedIterator, FreezeFlags, IdIterator, IterKind,
    NullIterator, PrimitiveSummary, RangeEstimate, Statistics, SMALL_SET_BUDGET,
};

#[derive(Debug)]
struct OrChild {
    it: BoxedIter,
    pending: Option<Id>,
    eof: bool,
}

/// Union; see the module docs.
#[derive(Debug)]
pub struct OrIterator {
    children: Vec<OrChild>,
    dir: Direction,
    low: Id,
    high: Id,
    /// All children sorted: the union is order-preserving.
    sorted: bool,
    /// Child indexes with a pending id, head first.
    active: Vec<usize>,
    /// Children whose pending slot needs a re-fill.
    need_fill: Vec<usize>,
    /// Exhausted children, in exhaustion order.
    eof_order: Vec<usize>,
    /// Insertion-sort anchor.
    last_inserted: usize,
    /// Unsorted path: the child currently being drained.
    current: usize,
    last: Option<Id>,
    stats: Option<Statistics>,
    stats_child: usize,
    /// User-visible stand-in for the set slice of cursors.
    masquerade: Option<String>,
}

impl OrIterator {
    /// Construction-time rewrites; see the module docs.
    pub fn create_commit(
        children: Vec<BoxedIter>,
        dir: Direction,
        low: Id,
        high: Id,
        masquerade: Option<String>,
    ) -> GraphResult<BoxedIter> {
        let mut children: Vec<BoxedIter> = children
            .into_iter()
            .filter(|c| c.kind() != IterKind::Null)
            .collect();
        if children.is_empty() {
            return Ok(Box::new(NullIterator::new(dir)));
        }
        if children.len() == 1 && masquerade.is_none() {
            return Ok(children.remove(0));
        }

        // become_small_set: if every child is a known, cheap, small
        // producer, materialise the whole union now.
        let cheap = children.iter().all(|c| {
            c.stats()
                .is_some_and(|s| s.scan_cost() <= SMALL_SET_BUDGET && s.next_cost <= 4)
        });
        if cheap {
            if let Some(set) = Self::become_small_set(&children, dir)? {
                return Ok(Box::new(set));
            }
        }

        Ok(Box::new(OrIterator::from_parts(
            children, dir, low, high, masquerade,
        )))
    }

    /// Drain all children into one fixed set. `None` if a child
    /// unexpectedly suspends under the generous materialisation budget.
    fn become_small_set(
        children: &[BoxedIter],
        dir: Direction,
    ) -> GraphResult<Option<FixedIterator>> {
        let mut budget = Budget::new(SMALL_SET_BUDGET as i64 * 4);
        let mut ids = Vec::new();
        for child in children {
            let mut probe = child.clone_iter();
            probe.reset();
            loop {
                match probe.next_id(&mut budget)? {
                    Advance::Id(id) => ids.push(id),
                    Advance::End => break,
                    Advance::Suspend => return Ok(None),
                }
            }
        }
        Ok(Some(FixedIterator::new(ids, dir)))
    }

    pub(crate) fn from_parts(
        children: Vec<BoxedIter>,
        dir: Direction,
        low: Id,
        high: Id,
        masquerade: Option<String>,
    ) -> OrIterator {
        let sorted = children.iter().all(|c| c.sorted());
        let n = children.len();
        OrIterator {
            children: children
                .into_iter()
                .map(|it| OrChild {
                    it,
                    pending: None,
                    eof: false,
                })
                .collect(),
            dir,
            low,
            high,
            sorted,
            active: Vec::with_capacity(n),
            need_fill: (0..n).collect(),
            eof_order: Vec::new(),
            last_inserted: 0,
            current: 0,
            last: None,
            stats: None,
            stats_child: 0,
            masquerade,
        }
    }

    pub fn masquerade(&self) -> Option<&str> {
        self.masquerade.as_deref()
    }

    pub(crate) fn set_masquerade(&mut self, masquerade: String) {
        self.masquerade = Some(masquerade);
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn IdIterator> {
        self.children.iter().map(|c| c.it.as_ref())
    }

    /// Insert `child` into the active chain ordered by pending id,
    /// anchored at the last-inserted memo.
    fn insert_active(&mut self, child: usize) {
        let id = self.children[child]
            .pending
            .unwrap_or(Id::NONE);
        let before = |a: Id, b: Id| match self.dir {
            Direction::Forward => a < b,
            Direction::Backward => a > b,
        };
        let mut at = self.last_inserted.min(self.active.len());
        // Walk left while our id sorts before the element to the left.
        while at > 0 {
            let left = self.children[self.active[at - 1]].pending.unwrap_or(Id::NONE);
            if before(id, left) {
                at -= 1;
            } else {
                break;
            }
        }
        // Walk right while the element at `at` sorts before our id.
        while at < self.active.len() {
            let here = self.children[self.active[at]].pending.unwrap_or(Id::NONE);
            if before(here, id) {
                at += 1;
            } else {
                break;
            }
        }
        self.active.insert(at, child);
        self.last_inserted = at;
    }

    /// Fill every pending slot in `need_fill`; may suspend.
    fn fill(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        while let Some(child) = self.need_fill.pop() {
            match self.children[child].it.next_id(budget)? {
                Advance::Id(id) => {
                    self.children[child].pending = Some(id);
                    self.insert_active(child);
                }
                Advance::End => {
                    self.children[child].eof = true;
                    self.eof_order.push(child);
                }
                Advance::Suspend => {
                    self.need_fill.push(child);
                    return Ok(Progress::Suspend);
                }
            }
        }
        Ok(Progress::Done)
    }

    fn sorted_next(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        if self.fill(budget)? == Progress::Suspend {
            return Ok(Advance::Suspend);
        }
        let Some(&head) = self.active.first() else {
            return Ok(Advance::End);
        };
        let id = self.children[head].pending.ok_or_else(|| {
            GraphError::Internal("active or-child without pending id".into())
        })?;
        // Invalidate every head equal to the winner in one round.
        while let Some(&child) = self.active.first() {
            if self.children[child].pending == Some(id) {
                self.active.remove(0);
                self.children[child].pending = None;
                self.need_fill.push(child);
            } else {
                break;
            }
        }
        self.last = Some(id);
        Ok(Advance::Id(id))
    }

    fn unsorted_next(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        'outer: while self.current < self.children.len() {
            let cur = self.current;
            if self.children[cur].eof {
                self.current += 1;
                continue;
            }
            match self.children[cur].it.next_id(budget)? {
                Advance::Suspend => return Ok(Advance::Suspend),
                Advance::End => {
                    self.children[cur].eof = true;
                    self.eof_order.push(cur);
                    self.current += 1;
                }
                Advance::Id(id) => {
                    // Skip ids an exhausted child already produced.
                    for i in 0..self.eof_order.len() {
                        let owner = self.eof_order[i];
                        if owner == cur {
                            continue;
                        }
                        match self.children[owner].it.check(id, budget)? {
                            Membership::Yes => continue 'outer,
                            Membership::No => {}
                            Membership::Suspend => {
                                // Retrying re-draws the id: the current
                                // child does not rewind, so remember it
                                // as a pending head instead.
                                self.children[cur].pending = Some(id);
                                return Ok(Advance::Suspend);
                            }
                        }
                    }
                    self.last = Some(id);
                    return Ok(Advance::Id(id));
                }
            }
        }
        Ok(Advance::End)
    }

    /// Deliver a pending id stashed by a suspended unsorted round.
    fn take_stashed(&mut self, budget: &mut Budget) -> GraphResult<Option<Advance>> {
        if self.sorted {
            return Ok(None);
        }
        let cur = self.current;
        if cur >= self.children.len() {
            return Ok(None);
        }
        let Some(id) = self.children[cur].pending else {
            return Ok(None);
        };
        for i in 0..self.eof_order.len() {
            let owner = self.eof_order[i];
            if owner == cur {
                continue;
            }
            match self.children[owner].it.check(id, budget)? {
                Membership::Yes => {
                    self.children[cur].pending = None;
                    return Ok(None);
                }
                Membership::No => {}
                Membership::Suspend => return Ok(Some(Advance::Suspend)),
            }
        }
        self.children[cur].pending = None;
        self.last = Some(id);
        Ok(Some(Advance::Id(id)))
    }

    /// Catch up to a resume id after thaw. The resume id has already
    /// been delivered, so it is a must-skip on every child.
    pub(crate) fn resume_at(&mut self, resume: Id, budget: &mut Budget) -> GraphResult<Progress> {
        if !self.sorted {
            return Err(GraphError::BadCursor(
                "resume id on an unsorted union".into(),
            ));
        }
        self.active.clear();
        self.need_fill.clear();
        self.eof_order.clear();
        for i in 0..self.children.len() {
            self.children[i].pending = None;
            self.children[i].eof = false;
            match self.children[i].it.find(resume, budget)? {
                Advance::Suspend => {
                    return Ok(Progress::Suspend);
                }
                Advance::End => {
                    self.children[i].eof = true;
                    self.eof_order.push(i);
                }
                Advance::Id(id) if id == resume => {
                    // Must-skip: this child would re-deliver the resume
                    // id; pull it once more.
                    match self.children[i].it.next_id(budget)? {
                        Advance::Suspend => return Ok(Progress::Suspend),
                        Advance::End => {
                            self.children[i].eof = true;
                            self.eof_order.push(i);
                        }
                        Advance::Id(next) => {
                            self.children[i].pending = Some(next);
                            self.insert_active(i);
                        }
                    }
                }
                Advance::Id(id) => {
                    self.children[i].pending = Some(id);
                    self.insert_active(i);
                }
            }
        }
        self.last = Some(resume);
        Ok(Progress::Done)
    }
}

impl IdIterator for OrIterator {
    fn kind(&self) -> IterKind {
        IterKind::Or
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        self.sorted
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        if self.stats.is_some() {
            return Ok(Progress::Done);
        }
        for i in self.stats_child..self.children.len() {
            match self.children[i].it.statistics(budget)? {
                Progress::Done => self.stats_child = i + 1,
                Progress::Suspend => {
                    self.stats_child = i;
                    return Ok(Progress::Suspend);
                }
            }
        }
        let child_stats: Vec<Statistics> = self
            .children
            .iter()
            .map(|c| {
                c.it.stats().unwrap_or(Statistics {
                    check_cost: u64::MAX / 4,
                    next_cost: u64::MAX / 4,
                    find_cost: u64::MAX / 4,
                    n: 0,
                    sorted: false,
                })
            })
            .collect();
        // Assume no overlap: n is the sum.
        let n: u64 = child_stats.iter().map(|s| s.n).sum();
        let weighted: u64 = child_stats
            .iter()
            .map(|s| s.n.saturating_mul(s.next_cost))
            .sum();
        let next_cost = if n == 0 { 1 } else { (weighted / n).max(1) };
        let check_cost = child_stats
            .iter()
            .map(|s| s.check_cost)
            .sum::<u64>()
            / (child_stats.len() as u64).max(1);
        let find_cost = child_stats.iter().map(|s| s.find_cost).max().unwrap_or(1);
        self.stats = Some(Statistics {
            check_cost,
            next_cost,
            find_cost,
            n,
            sorted: self.sorted,
        });
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        self.stats
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        if let Some(step) = self.take_stashed(budget)? {
            return Ok(step);
        }
        if self.sorted {
            self.sorted_next(budget)
        } else {
            self.unsorted_next(budget)
        }
    }

    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance> {
        if !self.sorted {
            return Err(GraphError::Internal(
                "find on an unsorted union".into(),
            ));
        }
        // Reposition every child, then re-sort and deliver the head.
        self.active.clear();
        self.need_fill.clear();
        self.eof_order.clear();
        for i in 0..self.children.len() {
            self.children[i].pending = None;
            self.children[i].eof = false;
            match self.children[i].it.find(target, budget)? {
                Advance::Suspend => return Ok(Advance::Suspend),
                Advance::End => {
                    self.children[i].eof = true;
                    self.eof_order.push(i);
                }
                Advance::Id(id) => {
                    self.children[i].pending = Some(id);
                    self.insert_active(i);
                }
            }
        }
        self.sorted_next(budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        let mut order: Vec<usize> = (0..self.children.len()).collect();
        order.sort_by_key(|i| {
            self.children[*i]
                .it
                .stats()
                .map_or(u64::MAX / 4, |s| s.check_cost)
        });
        for i in order {
            match self.children[i].it.check(id, budget)? {
                Membership::Yes => return Ok(Membership::Yes),
                Membership::No => {}
                Membership::Suspend => return Ok(Membership::Suspend),
            }
        }
        Ok(Membership::No)
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        let children: Vec<BoxedIter> =
            self.children.iter().map(|c| c.it.clone_iter()).collect();
        let mut clone = OrIterator::from_parts(
            children,
            self.dir,
            self.low,
            self.high,
            self.masquerade.clone(),
        );
        clone.stats = self.stats;
        Box::new(clone)
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.it.reset();
            child.pending = None;
            child.eof = false;
        }
        self.active.clear();
        self.need_fill = (0..self.children.len()).collect();
        self.eof_order.clear();
        self.last_inserted = 0;
        self.current = 0;
        self.last = None;
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            match &self.masquerade {
                Some(masq) => {
                    // Inject the id window into the first `::` of the
                    // masquerade; the true set travels in the state
                    // slice side-channel.
                    let bracket = format!("[{}-{}]", self.low, self.high);
                    let injected = match masq.find("::") {
                        Some(at) => {
                            let (head, tail) = masq.split_at(at + 1);
                            format!("{head}{bracket}{tail}")
                        }
                        None => format!("{masq}{bracket}"),
                    };
                    slices.push(injected);
                }
                None => {
                    let mut s = format!(
                        "or:{}[{}-{}]:{}:",
                        self.dir.token(),
                        self.low,
                        self.high,
                        self.children.len()
                    );
                    for child in &self.children {
                        let mut sub = String::new();
                        child.it.freeze(FreezeFlags::SET, &mut sub)?;
                        s.push('(');
                        s.push_str(&sub);
                        s.push(')');
                    }
                    slices.push(s);
                }
            }
        }
        if flags.position {
            // A sorted union resumes from its last delivered id; the
            // unsorted path records the draining child too.
            slices.push(format!(
                "{}:{}",
                self.current,
                self.last.map_or_else(|| "*".to_string(), |id| id.to_string())
            ));
        }
        if flags.state {
            let mut s = match self.stats {
                Some(st) => format!(
                    "s:{},{},{},{},{}",
                    st.check_cost,
                    st.next_cost,
                    st.find_cost,
                    st.n,
                    u8::from(st.sorted)
                ),
                None => String::new(),
            };
            if self.masquerade.is_some() {
                // Side-channel: the true set representation.
                let mut true_set = format!(
                    "or:{}[{}-{}]:{}:",
                    self.dir.token(),
                    self.low,
                    self.high,
                    self.children.len()
                );
                for child in &self.children {
                    let mut sub = String::new();
                    child.it.freeze(FreezeFlags::SET, &mut sub)?;
                    true_set.push('(');
                    true_set.push_str(&sub);
                    true_set.push(')');
                }
                s.push_str(":(");
                s.push_str(&true_set);
                s.push(')');
            }
            slices.push(s);
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        if !self.sorted {
            return Ok(false);
        }
        Ok(super::beyond_by_id(self.dir, self.last, id))
    }

    fn range_estimate(&self) -> RangeEstimate {
        let mut low = Id::NONE;
        let mut high = Id::ZERO;
        let mut n_max = 0u64;
        for child in &self.children {
            let r = child.it.range_estimate();
            low = low.min(r.low);
            high = high.max(r.high);
            n_max = n_max.saturating_add(r.n_max);
        }
        RangeEstimate {
            low,
            high,
            n_exact: None,
            n_max,
        }
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        // Only profiles shared by every branch survive a union.
        let mut iter = self.children.iter();
        let first = iter.next()?.it.primitive_summary()?;
        let mut shared = first;
        for child in iter {
            let s = child.it.primitive_summary()?;
            let mut keep = PrimitiveSummary::default();
            for l in crate::store::Linkage::ALL {
                if let Some(g) = shared.get(l) {
                    if s.get(l) == Some(g) {
                        keep = keep.with(l, g);
                    }
                }
            }
            shared = keep;
        }
        if shared.is_empty() {
            None
        } else {
            Some(shared)
        }
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
    use crate::iter::FixedIterator;

    fn ids(raw: &[u64]) -> Vec<Id> {
        raw.iter().map(|r| Id::new(*r)).collect()
    }

    fn fixed(raw: &[u64], dir: Direction) -> BoxedIter {
        Box::new(FixedIterator::new(ids(raw), dir))
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
    fn test_union_of_singletons() {
        let mut it = OrIterator::from_parts(
            vec![fixed(&[7], Direction::Forward), fixed(&[3], Direction::Forward)],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        assert_eq!(drain(&mut it), vec![3, 7]);

        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[7], Direction::Backward),
                fixed(&[3], Direction::Backward),
            ],
            Direction::Backward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        assert_eq!(drain(&mut it), vec![7, 3]);
    }

    #[test]
    fn test_union_dedups_ties() {
        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[1, 3, 5], Direction::Forward),
                fixed(&[3, 5, 7], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        assert_eq!(drain(&mut it), vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_find_repositions_all_children() {
        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[1, 4, 9], Direction::Forward),
                fixed(&[2, 6], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        let mut budget = Budget::unlimited();
        assert_eq!(
            it.find(Id::new(5), &mut budget).unwrap(),
            Advance::Id(Id::new(6))
        );
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(9)));
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::End);
    }

    #[test]
    fn test_check() {
        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[1, 4], Direction::Forward),
                fixed(&[2, 6], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        let mut budget = Budget::unlimited();
        assert_eq!(it.check(Id::new(6), &mut budget).unwrap(), Membership::Yes);
        assert_eq!(it.check(Id::new(5), &mut budget).unwrap(), Membership::No);
    }

    #[test]
    fn test_create_commit_rewrites() {
        // or() -> null
        let it = OrIterator::create_commit(vec![], Direction::Forward, Id::ZERO, Id::NONE, None)
            .unwrap();
        assert_eq!(it.kind(), IterKind::Null);

        // or(null, x) -> x
        let it = OrIterator::create_commit(
            vec![
                Box::new(NullIterator::new(Direction::Forward)),
                fixed(&[5], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        )
        .unwrap();
        assert_eq!(it.kind(), IterKind::Fixed);

        // All-cheap children collapse into one fixed set.
        let mut it = OrIterator::create_commit(
            vec![fixed(&[7, 1], Direction::Forward), fixed(&[3], Direction::Forward)],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        )
        .unwrap();
        assert_eq!(it.kind(), IterKind::Fixed);
        assert_eq!(drain(it.as_mut()), vec![1, 3, 7]);
    }

    #[test]
    fn test_resume_id_is_must_skip() {
        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[1, 3, 5], Direction::Forward),
                fixed(&[3, 7], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        let mut budget = Budget::unlimited();
        assert_eq!(it.resume_at(Id::new(3), &mut budget).unwrap(), Progress::Done);
        assert_eq!(drain(&mut it), vec![5, 7]);
    }

    #[test]
    fn test_unsorted_path_skips_eof_owned_ids() {
        // The bin-like child is unsorted; ids 3 and 5 appear in both
        // children. The first child drains fully, then the second must
        // skip what the first already produced.
        #[derive(Debug)]
        struct Unsorted(FixedIterator);
        impl IdIterator for Unsorted {
            fn kind(&self) -> IterKind {
                IterKind::Fixed
            }
            fn direction(&self) -> Direction {
                self.0.direction()
            }
            fn sorted(&self) -> bool {
                false
            }
            fn id_range(&self) -> (Id, Id) {
                self.0.id_range()
            }
            fn statistics(&mut self, b: &mut Budget) -> GraphResult<Progress> {
                self.0.statistics(b)
            }
            fn stats(&self) -> Option<Statistics> {
                self.0.stats().map(|s| Statistics { sorted: false, ..s })
            }
            fn next_id(&mut self, b: &mut Budget) -> GraphResult<Advance> {
                self.0.next_id(b)
            }
            fn find(&mut self, t: Id, b: &mut Budget) -> GraphResult<Advance> {
                self.0.find(t, b)
            }
            fn check(&mut self, id: Id, b: &mut Budget) -> GraphResult<Membership> {
                self.0.check(id, b)
            }
            fn clone_iter(&self) -> BoxedIter {
                Box::new(Unsorted(FixedIterator::new(
                    self.0.ids().to_vec(),
                    self.0.direction(),
                )))
            }
            fn reset(&mut self) {
                self.0.reset();
            }
            fn freeze(&self, f: FreezeFlags, out: &mut String) -> GraphResult<()> {
                self.0.freeze(f, out)
            }
            fn beyond(&self, id: Id) -> GraphResult<bool> {
                self.0.beyond(id)
            }
            fn range_estimate(&self) -> RangeEstimate {
                self.0.range_estimate()
            }
            fn last_id(&self) -> Option<Id> {
                self.0.last_id()
            }
            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        let a: BoxedIter = Box::new(Unsorted(FixedIterator::new(
            ids(&[3, 5]),
            Direction::Forward,
        )));
        let b = fixed(&[3, 5, 8], Direction::Forward);
        let mut it = OrIterator::from_parts(
            vec![a, b],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        assert!(!it.sorted());
        assert_eq!(drain(&mut it), vec![3, 5, 8]);
    }

    #[test]
    fn test_masquerade_bracket_injection() {
        let it = OrIterator::from_parts(
            vec![
                fixed(&[1], Direction::Forward),
                fixed(&[2], Direction::Forward),
            ],
            Direction::Forward,
            Id::new(0),
            Id::new(16),
            Some("value>=(\"a\"::sorted)".to_string()),
        );
        let mut out = String::new();
        it.freeze(FreezeFlags::SET, &mut out).unwrap();
        assert_eq!(out, "value>=(\"a\":[0-10]:sorted)");
    }

    #[test]
    fn test_suspend_resume_with_tiny_budgets() {
        let mut it = OrIterator::from_parts(
            vec![
                fixed(&[1, 4, 9, 12], Direction::Forward),
                fixed(&[2, 4, 10], Direction::Forward),
                fixed(&[3, 9], Direction::Forward),
            ],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
            None,
        );
        let mut out = Vec::new();
        loop {
            let mut budget = Budget::new(2);
            match it.next_id(&mut budget).unwrap() {
                Advance::Id(id) => out.push(id.raw()),
                Advance::End => break,
                Advance::Suspend => {}
            }
        }
        assert_eq!(out, vec![1, 2, 3, 4, 9, 10, 12]);
    }
}
